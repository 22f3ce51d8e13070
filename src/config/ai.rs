// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "anthropic".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_tokens() -> u32 {
    1024
}

/// Model backend selection. Consumed by `model::build_model_client`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// "anthropic" | "openai" | "ollama" | "static" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Empty means the provider's default model.
    pub model: String,
    /// "ENV" means: read from ANTHROPIC_API_KEY / OPENAI_API_KEY (by provider)
    pub api_key: String,
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Canned response for the `static` provider.
    pub static_response: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: String::new(),
            api_key: "ENV".to_string(),
            base_url: None,
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            static_response: None,
        }
    }
}

impl ModelConfig {
    /// Lowercase the provider and resolve an `"ENV"` api key.
    pub fn resolve(&mut self) -> anyhow::Result<()> {
        self.provider = self.provider.trim().to_lowercase();

        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = match self.provider.as_str() {
                "anthropic" => env::var("ANTHROPIC_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing ANTHROPIC_API_KEY env var"))?,
                "openai" => env::var("OPENAI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing OPENAI_API_KEY env var"))?,
                // keyless backends
                "ollama" | "static" => String::new(),
                other => anyhow::bail!("Unsupported model provider in config: {other}"),
            };
        }

        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        if self.max_tokens == 0 {
            self.max_tokens = default_max_tokens();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_per_provider() {
        env::set_var("OPENAI_API_KEY", "sk-test");
        let mut cfg = ModelConfig {
            provider: " OpenAI ".into(),
            ..Default::default()
        };
        cfg.resolve().unwrap();
        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.api_key, "sk-test");
        env::remove_var("OPENAI_API_KEY");
    }

    #[serial_test::serial]
    #[test]
    fn missing_env_key_is_an_error() {
        env::remove_var("ANTHROPIC_API_KEY");
        let mut cfg = ModelConfig::default();
        assert!(cfg.resolve().is_err());
    }

    #[test]
    fn keyless_providers_resolve_without_env() {
        let mut cfg = ModelConfig {
            provider: "ollama".into(),
            timeout_secs: 0,
            ..Default::default()
        };
        cfg.resolve().unwrap();
        assert!(cfg.api_key.is_empty());
        assert_eq!(cfg.timeout_secs, 60);
    }
}
