use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{build_http, provider_error, ModelClient};
use crate::error::ModelError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    /// Constrains the output to JSON.
    format: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    error: Option<String>,
}

/// Local Ollama server (`/api/generate`, non-streaming).
pub struct OllamaClient {
    base_url: String,
    model: String,
    http: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, ModelError> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.trim().to_string(),
            http: build_http(reqwest::Client::builder().timeout(timeout))?,
        })
    }
}

#[async_trait::async_trait]
impl ModelClient for OllamaClient {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let req = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
        };

        let resp = self
            .http
            .post(format!("{}/api/generate", self.base_url))
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(provider_error("ollama", resp).await);
        }

        let body: GenerateResponse = resp.json().await?;
        // Ollama may report failures inside a 200 body
        if let Some(message) = body.error.filter(|e| !e.is_empty()) {
            return Err(ModelError::Provider {
                provider: "ollama",
                status: 200,
                message,
            });
        }
        if body.response.trim().is_empty() {
            return Err(ModelError::EmptyResponse("ollama"));
        }
        Ok(body.response)
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
