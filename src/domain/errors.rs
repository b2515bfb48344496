//! Domain errors for the maestro orchestration layer.

use thiserror::Error;

/// Domain-level errors that can occur while registering, constructing,
/// selecting, or invoking agents and models.
///
/// Agent execution itself never surfaces these: adapters convert backend
/// failures into failed responses or terminal error chunks.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already registered: {id}")]
    DuplicateRegistration { kind: &'static str, id: String },

    #[error("Type mismatch for {id}: metadata declares '{declared}' but adapter is '{actual}'")]
    TypeMismatch {
        id: String,
        declared: String,
        actual: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Health check failed for {id}: {message}")]
    HealthCheckFailed { id: String, message: String },

    #[error("Backend execution failed: {0}")]
    BackendExecutionFailure(String),

    #[error("All fallback models failed. Last error: {last_error}")]
    AllFallbacksExhausted { last_error: String },

    #[error("No suitable model found: {0}")]
    NoSuitableModel(String),

    #[error("Model {0} does not support streaming")]
    StreamingUnsupported(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DomainError {
    pub fn agent_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Agent",
            id: id.into(),
        }
    }

    pub fn model_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Model",
            id: id.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendExecutionFailure(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for DomainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::BackendExecutionFailure(format!("request timed out: {err}"))
        } else {
            Self::BackendExecutionFailure(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_kind() {
        let err = DomainError::agent_not_found("n8n");
        assert_eq!(err.to_string(), "Agent not found: n8n");

        let err = DomainError::model_not_found("openai:gpt-4");
        assert_eq!(err.to_string(), "Model not found: openai:gpt-4");
    }

    #[test]
    fn test_fallback_exhaustion_carries_last_error() {
        let err = DomainError::AllFallbacksExhausted {
            last_error: "rate limited".to_string(),
        };
        assert!(err.to_string().contains("rate limited"));
    }
}
