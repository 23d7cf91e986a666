//! Error types for the provider crate.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the provider error type.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Error type for embedding and abstraction calls.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Backend/API error from the provider.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Network/connectivity error (retryable).
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not finish within its time budget (retryable).
    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Configuration error (API key missing, unknown provider, etc.).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Rate limit exceeded (retryable with backoff).
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// The provider has no answer for this input.
    #[error("No embedding available for input: {0}")]
    UnknownInput(String),

    /// Authentication failed.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LlmError {
    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimit(_)
        )
    }

    /// Map a non-success HTTP status into the matching error variant.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => Self::Auth(body),
            429 => Self::RateLimit(body),
            500..=599 => Self::Network(format!("HTTP {}: {}", status, body)),
            _ => Self::Backend(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Network(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            LlmError::Network(format!("Connection failed: {}", err))
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable() {
        assert!(LlmError::Network("reset".to_string()).is_retryable());
        assert!(LlmError::Timeout(Duration::from_millis(50)).is_retryable());
        assert!(LlmError::RateLimit("slow down".to_string()).is_retryable());
        assert!(!LlmError::Config("bad config".to_string()).is_retryable());
        assert!(!LlmError::Auth("unauthorized".to_string()).is_retryable());
        assert!(!LlmError::UnknownInput("q".to_string()).is_retryable());
    }

    #[test]
    fn test_from_status() {
        let err = LlmError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "x".into());
        assert!(matches!(err, LlmError::RateLimit(_)));

        let err = LlmError::from_status(reqwest::StatusCode::UNAUTHORIZED, "x".into());
        assert!(matches!(err, LlmError::Auth(_)));

        let err = LlmError::from_status(reqwest::StatusCode::BAD_GATEWAY, "x".into());
        assert!(err.is_retryable());

        let err = LlmError::from_status(reqwest::StatusCode::BAD_REQUEST, "x".into());
        assert!(matches!(err, LlmError::Backend(_)));
    }

    #[test]
    fn test_timeout_display() {
        let err = LlmError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Request timed out after 250ms");
    }
}
