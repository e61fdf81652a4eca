use std::path::PathBuf;

use llemmy_storage::StorageError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("no chat models configured"))]
    NoChatModels { stage: &'static str },
    #[snafu(display("unsupported attachment type '{mime_type}'"))]
    UnsupportedMimeType {
        stage: &'static str,
        mime_type: String,
    },
    #[snafu(display("failed to read attachment {path:?}: {source}"))]
    ReadAttachment {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("nothing to send, the prompt is blank and has no attachments"))]
    NothingToSend { stage: &'static str },
    #[snafu(display("a prompt is still being processed"))]
    Processing { stage: &'static str },
    #[snafu(display("unknown chat model '{name}'"))]
    UnknownModel { stage: &'static str, name: String },
    #[snafu(display("chat storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("background task failed on `{stage}`: {source}"))]
    BackgroundTask {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
