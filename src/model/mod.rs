//! Model backends behind a single `generate(prompt) -> text` contract.
//!
//! The caller owns the deadline: it wraps `generate` in `tokio::time::timeout`,
//! and dropping the future cancels the in-flight request. Each client also
//! carries its own HTTP timeout as an outer bound.

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod static_model;

pub use anthropic::AnthropicClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use static_model::StaticModel;

use std::sync::Arc;
use std::time::Duration;

use crate::config::ModelConfig;
use crate::error::ModelError;

#[async_trait::async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
    /// Provider name for diagnostics/logs.
    fn name(&self) -> &'static str;
}

pub type DynModelClient = Arc<dyn ModelClient>;

/// Build the configured backend. Provider selection is an explicit match; an
/// unknown name is a configuration error.
pub fn build_model_client(cfg: &ModelConfig) -> Result<DynModelClient, ModelError> {
    let mut cfg = cfg.clone();
    cfg.resolve().map_err(|e| ModelError::Config(e.to_string()))?;
    let timeout = Duration::from_secs(cfg.timeout_secs);

    let client: DynModelClient = match cfg.provider.as_str() {
        "anthropic" => {
            if cfg.api_key.trim().is_empty() {
                return Err(ModelError::Config("api_key is required for anthropic".into()));
            }
            let mut c = AnthropicClient::new(&cfg.api_key, &cfg.model, cfg.max_tokens, timeout)?;
            if let Some(url) = &cfg.base_url {
                c = c.with_base_url(url);
            }
            Arc::new(c)
        }
        "openai" => {
            if cfg.api_key.trim().is_empty() {
                return Err(ModelError::Config("api_key is required for openai".into()));
            }
            let mut c = OpenAiClient::new(&cfg.api_key, &cfg.model, cfg.max_tokens, timeout)?;
            if let Some(url) = &cfg.base_url {
                c = c.with_base_url(url);
            }
            Arc::new(c)
        }
        "ollama" => {
            if cfg.model.trim().is_empty() {
                return Err(ModelError::Config("model is required for ollama".into()));
            }
            let base = cfg.base_url.as_deref().unwrap_or(ollama::DEFAULT_BASE_URL);
            Arc::new(OllamaClient::new(base, &cfg.model, timeout)?)
        }
        "static" => Arc::new(StaticModel::new(
            cfg.static_response
                .unwrap_or_else(|| static_model::NEUTRAL_RESPONSE.to_string()),
        )),
        other => {
            return Err(ModelError::Config(format!("unknown model provider {other:?}")));
        }
    };

    tracing::info!(provider = client.name(), model = %cfg.model, "model client ready");
    Ok(client)
}

/// Finish an HTTP client builder. A builder failure (e.g. no TLS backend) is a
/// configuration error rather than a silent fallback to a client without timeouts.
pub(crate) fn build_http(builder: reqwest::ClientBuilder) -> Result<reqwest::Client, ModelError> {
    builder
        .build()
        .map_err(|e| ModelError::Config(format!("http client: {e}")))
}

/// Read an error response body and turn it into a typed provider failure.
pub(crate) async fn provider_error(provider: &'static str, resp: reqwest::Response) -> ModelError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    ModelError::Provider {
        provider,
        status,
        message: extract_error_message(&body),
    }
}

/// Pull `error.message` (or a string `error`) out of a JSON error payload,
/// falling back to the raw body.
fn extract_error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let msg = parsed.as_ref().and_then(|v| match v.get("error") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(obj) => {
            let message = obj.get("message").and_then(|m| m.as_str())?;
            match obj.get("type").and_then(|t| t.as_str()) {
                Some(kind) => Some(format!("{kind}: {message}")),
                None => Some(message.to_string()),
            }
        }
        None => None,
    });
    let out = msg.unwrap_or_else(|| body.trim().to_string());
    out.chars().take(500).collect()
}
