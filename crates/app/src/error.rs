use std::path::PathBuf;

use llemmy_chat::ChatError;
use llemmy_storage::StorageError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display("failed to open chat database at {path:?} on `{stage}`: {source}"))]
    OpenDatabase {
        stage: &'static str,
        path: PathBuf,
        source: StorageError,
    },
    #[snafu(display("failed to start chat workflow on `{stage}`: {source}"))]
    StartWorkflow {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("failed to read console input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("{message}"))]
    Usage {
        stage: &'static str,
        message: String,
    },
}

pub type AppResult<T> = Result<T, AppError>;
