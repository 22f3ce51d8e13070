use super::ModelClient;
use crate::error::ModelError;

/// Verdict returned when no canned response is configured.
pub const NEUTRAL_RESPONSE: &str = r#"{"sentiment":"neutral","impact":"low","summary":"No model configured; neutral placeholder.","stocks":[],"confidence":0.5}"#;

/// Deterministic backend that always answers with the same text.
/// Used for dry runs and wherever a real model is not wanted.
#[derive(Debug, Clone)]
pub struct StaticModel {
    response: String,
}

impl StaticModel {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

impl Default for StaticModel {
    fn default() -> Self {
        Self::new(NEUTRAL_RESPONSE)
    }
}

#[async_trait::async_trait]
impl ModelClient for StaticModel {
    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        Ok(self.response.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
