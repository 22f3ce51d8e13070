use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{build_http, provider_error, ModelClient};
use crate::error::ModelError;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str =
    "You are a financial news analyst. Respond with a single JSON object and nothing else.";

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI Chat Completions client (also fits compatible gateways via `base_url`).
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: &str, model: &str, max_tokens: u32, timeout: Duration) -> Result<Self, ModelError> {
        let http = build_http(
            reqwest::Client::builder()
                .user_agent(concat!("market-sentinel/", env!("CARGO_PKG_VERSION")))
                .connect_timeout(Duration::from_secs(4))
                .timeout(timeout),
        )?;
        let model = if model.trim().is_empty() {
            DEFAULT_MODEL
        } else {
            model.trim()
        };
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
            max_tokens,
            base_url: OPENAI_API_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait::async_trait]
impl ModelClient for OpenAiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(provider_error("openai", resp).await);
        }

        let body: Resp = resp.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ModelError::EmptyResponse("openai"))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
