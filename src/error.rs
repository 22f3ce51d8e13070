//! Typed errors at each boundary. Application wiring uses `anyhow` on top.

use thiserror::Error;

/// Failures of the persistence gateway.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("json column error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

/// Failures of a model backend call.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model call timed out after {0}s")]
    Timeout(u64),
    #[error("model transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The provider answered with an error payload; never folded into response text.
    #[error("{provider} error (status {status}): {message}")]
    Provider {
        provider: &'static str,
        status: u16,
        message: String,
    },
    #[error("{0} returned no text content")]
    EmptyResponse(&'static str),
    #[error("model configuration error: {0}")]
    Config(String),
}

/// Failures turning model text into the structured verdict.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no balanced JSON object found in model response")]
    NoJsonObject,
    #[error("model JSON did not match schema: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why one item's analysis was abandoned for this cycle.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Network/timeout/auth/rate-limit calling the model.
    #[error("transient: {0}")]
    Transient(#[from] ModelError),
    /// Model answered, but not in the expected schema.
    #[error("malformed response: {0}")]
    Malformed(#[from] ParseError),
    /// Gateway write failed; the item keeps its retry-ability.
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
}

impl AnalysisError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Transient(_) => "transient",
            AnalysisError::Malformed(_) => "malformed",
            AnalysisError::Storage(_) => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_error_kinds() {
        let t: AnalysisError = ModelError::Timeout(5).into();
        assert_eq!(t.kind(), "transient");
        let m: AnalysisError = ParseError::NoJsonObject.into();
        assert_eq!(m.kind(), "malformed");
        let s: AnalysisError = StoreError::NotFound {
            entity: "news item",
            id: "x".into(),
        }
        .into();
        assert_eq!(s.kind(), "storage");
        assert!(s.to_string().contains("news item not found: x"));
    }

    #[test]
    fn provider_error_keeps_payload() {
        let e = ModelError::Provider {
            provider: "anthropic",
            status: 429,
            message: "rate_limit_error: slow down".into(),
        };
        assert_eq!(
            e.to_string(),
            "anthropic error (status 429): rate_limit_error: slow down"
        );
    }
}
