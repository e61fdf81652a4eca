pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1";

pub const DEFAULT_OLLAMA_MODEL: &str = "orca-mini";
pub const DEFAULT_OLLAMA_ENDPOINT: &str = "http://localhost:11434/v1";
// Ollama ignores the bearer token, but the OpenAI-compatible client insists on one.
pub(crate) const OLLAMA_PLACEHOLDER_API_KEY: &str = "ollama";

/// Which completion endpoint family a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionApi {
    Responses,
    ChatCompletions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

impl ProviderKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" | "rig-openai" => Some(Self::OpenAi),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Ollama => "Ollama",
        }
    }

    pub fn default_endpoint(&self) -> &'static str {
        match self {
            Self::OpenAi => DEFAULT_OPENAI_ENDPOINT,
            Self::Ollama => DEFAULT_OLLAMA_ENDPOINT,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => DEFAULT_OPENAI_MODEL,
            Self::Ollama => DEFAULT_OLLAMA_MODEL,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAi)
    }

    pub fn completion_api(&self) -> CompletionApi {
        match self {
            Self::OpenAi => CompletionApi::Responses,
            Self::Ollama => CompletionApi::ChatCompletions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_aliases() {
        assert_eq!(ProviderKind::parse(" OpenAI "), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::parse("rig-openai"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::parse("ollama"), Some(ProviderKind::Ollama));
        assert_eq!(ProviderKind::parse("anthropic"), None);
    }

    #[test]
    fn only_openai_needs_a_key() {
        assert!(ProviderKind::OpenAi.requires_api_key());
        assert!(!ProviderKind::Ollama.requires_api_key());
    }
}
