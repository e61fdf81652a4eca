use rig::OneOrMany;
use rig::completion::{AssistantContent, CompletionModel, Message as RigMessage};
use rig::message::{DocumentMediaType, ImageMediaType, UserContent};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use snafu::{OptionExt, ResultExt, ensure};

use super::message::{AssistantReply, ChatResponse, ContentBlock, TokenUsage, UserMessage};
use super::model::{CompletionApi, OLLAMA_PLACEHOLDER_API_KEY, ProviderKind};
use super::provider::{
    BoxFuture, ChatModel, CompletionsFailedSnafu, EmptyMessageSnafu, EmptyReplySnafu,
    HttpClientSnafu, MissingApiKeySnafu, MissingModelNameSnafu, ProviderConfig, ProviderResult,
    UnsupportedProviderSnafu,
};

/// Chat model backed by rig's OpenAI-compatible client.
pub struct RigChatModel {
    name: String,
    kind: ProviderKind,
    config: ProviderConfig,
    client: openai::Client,
}

impl std::fmt::Debug for RigChatModel {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RigChatModel")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("model_name", &self.config.model_name)
            .field("endpoint", &self.config.endpoint)
            .finish_non_exhaustive()
    }
}

impl RigChatModel {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let kind = ProviderKind::parse(&config.provider_id).context(UnsupportedProviderSnafu {
            stage: "rig-model-new",
            provider_id: config.provider_id.clone(),
        })?;

        ensure!(
            !kind.requires_api_key() || !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "rig-model-new",
                provider_id: config.provider_id.clone(),
            }
        );
        ensure!(
            !config.model_name.is_empty(),
            MissingModelNameSnafu {
                stage: "rig-model-new",
                provider_id: config.provider_id.clone(),
            }
        );

        let client = Self::build_client(kind, &config)?;
        let name = config
            .label
            .clone()
            .unwrap_or_else(|| format!("{} {}", kind.display_name(), config.model_name));

        Ok(Self {
            name,
            kind,
            config,
            client,
        })
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn build_client(kind: ProviderKind, config: &ProviderConfig) -> ProviderResult<openai::Client> {
        let api_key = if config.api_key.is_empty() {
            OLLAMA_PLACEHOLDER_API_KEY
        } else {
            config.api_key.as_str()
        };
        let endpoint = if config.endpoint.is_empty() {
            kind.default_endpoint()
        } else {
            config.endpoint.as_str()
        };

        openai::Client::builder()
            .api_key(api_key)
            .base_url(endpoint)
            .build()
            .context(HttpClientSnafu {
                stage: "build-client",
            })
    }

    fn to_user_content(block: &ContentBlock) -> UserContent {
        match block {
            ContentBlock::Text { text } => UserContent::text(text.clone()),
            ContentBlock::Image {
                mime_type,
                data_base64,
            } => UserContent::image_base64(
                data_base64.clone(),
                image_media_type(mime_type),
                None,
            ),
            ContentBlock::Pdf { data_base64, .. } => {
                UserContent::document(data_base64.clone(), Some(DocumentMediaType::PDF))
            }
        }
    }

    fn to_rig_message(message: &UserMessage) -> ProviderResult<RigMessage> {
        let contents = message
            .contents
            .iter()
            .map(Self::to_user_content)
            .collect::<Vec<_>>();
        let content = OneOrMany::many(contents).map_err(|_| {
            EmptyMessageSnafu {
                stage: "to-rig-message",
            }
            .build()
        })?;

        Ok(RigMessage::User { content })
    }

    async fn complete<M>(&self, model: M, prompt: RigMessage) -> ProviderResult<ChatResponse>
    where
        M: CompletionModel,
    {
        let mut builder = model.completion_request(prompt);

        if let Some(preamble) = &self.config.preamble
            && !preamble.trim().is_empty()
        {
            builder = builder.preamble(preamble.clone());
        }

        if let Some(temperature) = self.config.temperature {
            builder = builder.temperature(temperature);
        }

        if let Some(max_tokens) = self.config.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }

        let response = builder.send().await.context(CompletionsFailedSnafu {
            stage: "send-completion",
        })?;

        let text = response
            .choice
            .iter()
            .filter_map(|content| match content {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        ensure!(
            !text.trim().is_empty(),
            EmptyReplySnafu {
                stage: "read-completion",
                model: self.config.model_name.clone(),
            }
        );

        Ok(ChatResponse {
            reply: AssistantReply::new(text),
            usage: TokenUsage {
                input_tokens: response.usage.input_tokens,
                output_tokens: response.usage.output_tokens,
                total_tokens: response.usage.total_tokens,
            },
        })
    }
}

impl ChatModel for RigChatModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn chat<'a>(&'a self, message: &'a UserMessage) -> BoxFuture<'a, ProviderResult<ChatResponse>> {
        Box::pin(async move {
            ensure!(
                !message.is_empty(),
                EmptyMessageSnafu {
                    stage: "chat-validate",
                }
            );

            let prompt = Self::to_rig_message(message)?;
            tracing::debug!(
                provider = self.kind.id(),
                model = %self.config.model_name,
                content_blocks = message.contents.len(),
                "sending chat request"
            );

            let model = self.client.completion_model(self.config.model_name.clone());
            let result = match self.kind.completion_api() {
                CompletionApi::Responses => self.complete(model, prompt).await,
                CompletionApi::ChatCompletions => {
                    self.complete(model.completions_api(), prompt).await
                }
            };

            if let Err(error) = &result {
                tracing::warn!(
                    provider = self.kind.id(),
                    model = %self.config.model_name,
                    error = %error,
                    "chat request failed"
                );
            }
            result
        })
    }
}

fn image_media_type(mime_type: &str) -> Option<ImageMediaType> {
    match mime_type {
        "image/png" => Some(ImageMediaType::PNG),
        "image/jpeg" => Some(ImageMediaType::JPEG),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;

    #[test]
    fn openai_without_key_is_rejected() {
        let config = ProviderConfig::new("openai", "", "", "gpt-4o-mini");
        let error = RigChatModel::new(config).expect_err("missing key must fail");
        assert!(matches!(error, ProviderError::MissingApiKey { .. }));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = ProviderConfig::new("mystery", "key", "", "model");
        let error = RigChatModel::new(config).expect_err("unknown provider must fail");
        assert!(matches!(error, ProviderError::UnsupportedProvider { .. }));
    }

    #[test]
    fn ollama_model_is_named_after_provider_and_model() {
        let config = ProviderConfig::new("ollama", "", "", "llama3");
        let model = RigChatModel::new(config).expect("ollama needs no key");
        assert_eq!(model.name(), "Ollama llama3");
        assert_eq!(model.kind(), ProviderKind::Ollama);
    }

    #[test]
    fn label_overrides_generated_name() {
        let config = ProviderConfig::new("ollama", "", "", "llama3").with_label("Local");
        let model = RigChatModel::new(config).expect("valid config");
        assert_eq!(model.name(), "Local");
    }

    #[test]
    fn rig_message_rejects_empty_content() {
        let message = UserMessage::new("alice");
        assert!(RigChatModel::to_rig_message(&message).is_err());
    }
}
