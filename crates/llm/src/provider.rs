use std::future::Future;
use std::pin::Pin;

use snafu::Snafu;

use super::message::{ChatResponse, UserMessage};

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub label: Option<String>,
    pub api_key: String,
    pub endpoint: String,
    pub model_name: String,
    pub preamble: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into().trim().to_string(),
            label: None,
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            model_name: model_name.into().trim().to_string(),
            preamble: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into().trim().to_string();
        self.label = (!label.is_empty()).then_some(label);
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("provider '{provider_id}' is not supported"))]
    UnsupportedProvider {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("no model name configured for provider '{provider_id}'"))]
    MissingModelName {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("chat request has no content"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("model '{model}' returned an empty reply"))]
    EmptyReply { stage: &'static str, model: String },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
    /// Failure reported by a provider as a bare message.
    #[snafu(display("{message}"))]
    Remote {
        stage: &'static str,
        message: String,
    },
}

/// A chat-completion model the conversation workflow can prompt.
pub trait ChatModel: Send + Sync {
    /// Display name, also recorded as the author of the model's replies.
    fn name(&self) -> &str;
    fn chat<'a>(&'a self, message: &'a UserMessage) -> BoxFuture<'a, ProviderResult<ChatResponse>>;
}
