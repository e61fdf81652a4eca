use std::path::{Path, PathBuf};
use std::sync::Arc;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use llemmy_llm::{
    ChatModel, DEFAULT_OLLAMA_MODEL, DEFAULT_OPENAI_MODEL, ProviderConfig, create_chat_model,
};
use serde::{Deserialize, Serialize};

pub const SETTINGS_DIRECTORY_NAME: &str = "llemmy";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "llemmy.db";
pub const ENV_PREFIX: &str = "LLEMMY_";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub provider_id: String,
    #[serde(default)]
    pub model_name: String,
    /// Display name; defaults to the provider and model name.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub api_key: String,
    /// Environment variable consulted when `api_key` is blank.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub preamble: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
}

impl ModelSettings {
    pub fn openai() -> Self {
        Self {
            provider_id: "openai".to_string(),
            model_name: DEFAULT_OPENAI_MODEL.to_string(),
            label: None,
            api_key: String::new(),
            api_key_env: Some(OPENAI_API_KEY_ENV.to_string()),
            endpoint: String::new(),
            preamble: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn ollama() -> Self {
        Self {
            provider_id: "ollama".to_string(),
            model_name: DEFAULT_OLLAMA_MODEL.to_string(),
            api_key_env: None,
            ..Self::openai()
        }
    }

    fn normalized(mut self) -> Option<Self> {
        self.provider_id = self.provider_id.trim().to_ascii_lowercase();
        if self.provider_id.is_empty() {
            return None;
        }
        self.model_name = self.model_name.trim().to_string();
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = self.endpoint.trim().to_string();
        Some(self)
    }

    fn resolved_api_key(&self) -> String {
        if !self.api_key.is_empty() {
            return self.api_key.clone();
        }

        self.api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .map(|key| key.trim().to_string())
            .unwrap_or_default()
    }

    pub fn to_provider_config(&self) -> ProviderConfig {
        let mut config = ProviderConfig::new(
            &self.provider_id,
            self.resolved_api_key(),
            &self.endpoint,
            &self.model_name,
        );
        if let Some(label) = &self.label {
            config = config.with_label(label.as_str());
        }
        if let Some(preamble) = &self.preamble {
            config = config.with_preamble(preamble.as_str());
        }
        if let Some(temperature) = self.temperature {
            config = config.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            config = config.with_max_tokens(max_tokens);
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlemmySettings {
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_models")]
    pub models: Vec<ModelSettings>,
}

impl Default for LlemmySettings {
    fn default() -> Self {
        Self {
            user_name: default_user_name(),
            database_path: default_database_path(),
            models: default_models(),
        }
    }
}

impl LlemmySettings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".llemmy"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Defaults, then the JSON file, then `LLEMMY_*` environment variables.
    /// Falls back to defaults when the merged configuration does not parse.
    pub fn load(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        match Self::figment(&path).extract::<LlemmySettings>() {
            Ok(settings) => {
                tracing::debug!(path = ?path, "loaded settings");
                settings.normalized()
            }
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to parse settings, using defaults");
                Self::default()
            }
        }
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(LlemmySettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn normalized(mut self) -> Self {
        self.user_name = self.user_name.trim().to_string();
        if self.user_name.is_empty() {
            self.user_name = default_user_name();
        }
        if self.database_path.as_os_str().is_empty() {
            self.database_path = default_database_path();
        }
        self.models = self
            .models
            .into_iter()
            .filter_map(ModelSettings::normalized)
            .collect();
        self
    }

    /// Builds every configured model, skipping the ones that fail.
    pub fn build_models(&self) -> Vec<Arc<dyn ChatModel>> {
        self.models
            .iter()
            .filter_map(|settings| match create_chat_model(settings.to_provider_config()) {
                Ok(model) => {
                    tracing::info!(model = %model.name(), "chat model available");
                    Some(model)
                }
                Err(error) => {
                    tracing::warn!(
                        provider = %settings.provider_id,
                        model = %settings.model_name,
                        error = %error,
                        "skipping chat model"
                    );
                    None
                }
            })
            .collect()
    }
}

fn default_user_name() -> String {
    ["USER", "USERNAME"]
        .into_iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| "user".to_string())
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".llemmy"))
        .join(DATABASE_FILE_NAME)
}

fn default_models() -> Vec<ModelSettings> {
    vec![ModelSettings::openai(), ModelSettings::ollama()]
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn file_and_environment_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "settings.json",
                r#"{
                    "user_name": "alice",
                    "models": [
                        { "provider_id": "ollama", "model_name": "llama3", "label": "Local" }
                    ]
                }"#,
            )?;
            jail.set_env("LLEMMY_DATABASE_PATH", "/tmp/llemmy-test.db");

            let settings: LlemmySettings =
                LlemmySettings::figment(Path::new("settings.json")).extract()?;
            assert_eq!(settings.user_name, "alice");
            assert_eq!(settings.database_path, PathBuf::from("/tmp/llemmy-test.db"));
            assert_eq!(settings.models.len(), 1);
            assert_eq!(settings.models[0].label.as_deref(), Some("Local"));
            Ok(())
        });
    }

    #[test]
    fn missing_file_keeps_default_models() {
        Jail::expect_with(|_jail| {
            let settings = LlemmySettings::load(Some(Path::new("absent.json")));
            let providers = settings
                .models
                .iter()
                .map(|model| model.provider_id.as_str())
                .collect::<Vec<_>>();
            assert_eq!(providers, vec!["openai", "ollama"]);
            assert_eq!(settings.models[1].model_name, DEFAULT_OLLAMA_MODEL);
            assert!(settings.database_path.ends_with(DATABASE_FILE_NAME));
            Ok(())
        });
    }

    #[test]
    fn normalization_drops_blank_providers() {
        let settings = LlemmySettings {
            user_name: "  ".to_string(),
            database_path: PathBuf::from("chat.db"),
            models: vec![
                ModelSettings {
                    provider_id: "  ".to_string(),
                    ..ModelSettings::ollama()
                },
                ModelSettings {
                    provider_id: " Ollama ".to_string(),
                    ..ModelSettings::ollama()
                },
            ],
        }
        .normalized();

        assert!(!settings.user_name.is_empty());
        assert_eq!(settings.models.len(), 1);
        assert_eq!(settings.models[0].provider_id, "ollama");
    }

    #[test]
    fn models_without_credentials_are_skipped() {
        Jail::expect_with(|jail| {
            jail.set_env("LLEMMY_TEST_MISSING_KEY", "");
            let settings = LlemmySettings {
                models: vec![
                    ModelSettings {
                        api_key_env: Some("LLEMMY_TEST_MISSING_KEY".to_string()),
                        ..ModelSettings::openai()
                    },
                    ModelSettings::ollama(),
                ],
                ..LlemmySettings::default()
            };

            let models = settings.build_models();
            assert_eq!(models.len(), 1);
            assert_eq!(models[0].name(), format!("Ollama {DEFAULT_OLLAMA_MODEL}"));
            Ok(())
        });
    }
}
