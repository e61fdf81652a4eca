use std::sync::Arc;

mod message;
mod model;
mod provider;
mod rig_adapter;

pub use message::{AssistantReply, ChatResponse, ContentBlock, TokenUsage, UserMessage};
pub use model::{
    CompletionApi, DEFAULT_OLLAMA_ENDPOINT, DEFAULT_OLLAMA_MODEL, DEFAULT_OPENAI_ENDPOINT,
    DEFAULT_OPENAI_MODEL, ProviderKind,
};
pub use provider::{BoxFuture, ChatModel, ProviderConfig, ProviderError, ProviderResult};
pub use rig_adapter::RigChatModel;

pub fn create_chat_model(mut config: ProviderConfig) -> ProviderResult<Arc<dyn ChatModel>> {
    let Some(kind) = ProviderKind::parse(&config.provider_id) else {
        return Err(ProviderError::UnsupportedProvider {
            stage: "create-chat-model",
            provider_id: config.provider_id,
        });
    };

    config.provider_id = kind.id().to_string();
    if config.model_name.is_empty() {
        config.model_name = kind.default_model().to_string();
    }

    Ok(Arc::new(RigChatModel::new(config)?))
}
