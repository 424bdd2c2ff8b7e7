//! Error types for the Anthropic API client

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when interacting with the Anthropic API
#[derive(Debug, Error)]
pub enum ClaudeError {
    /// Missing `ANTHROPIC_API_KEY` environment variable
    #[error("Missing ANTHROPIC_API_KEY environment variable")]
    MissingApiKey,

    /// The HTTP client could not be constructed
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// HTTP request failed before a response arrived
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// No response within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Response parsing failed
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// Rate limited - too many requests
    #[error("Rate limited - too many requests")]
    RateLimited,

    /// Unauthorized - invalid API key
    #[error("Unauthorized - invalid API key")]
    Unauthorized,

    /// API returned an error
    #[error("API error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from API
        message: String,
    },
}

impl ClaudeError {
    /// Whether the same request may succeed if sent again later.
    ///
    /// Network failures, timeouts, rate limiting and 5xx/529 responses are
    /// retryable; authentication and other 4xx errors are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RequestFailed(_) | Self::Timeout(_) | Self::RateLimited => true,
            Self::ApiError { status, .. } => *status >= 500,
            Self::MissingApiKey
            | Self::ClientBuild(_)
            | Self::ResponseParseFailed(_)
            | Self::Unauthorized => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        assert!(ClaudeError::RateLimited.is_retryable());
        assert!(ClaudeError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(
            ClaudeError::ApiError {
                status: 529,
                message: "overloaded".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn client_errors_are_not_retryable() {
        assert!(!ClaudeError::Unauthorized.is_retryable());
        assert!(
            !ClaudeError::ApiError {
                status: 400,
                message: "bad request".to_string()
            }
            .is_retryable()
        );
    }
}
