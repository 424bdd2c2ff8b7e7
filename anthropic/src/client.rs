//! Anthropic API client implementation

use crate::{
    error::ClaudeError,
    messages::{ErrorResponse, MessagesRequest, MessagesResponse},
};
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Production API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1";

const API_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Anthropic API client
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    api_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AnthropicClient {
    /// Create a new client with explicit API key
    ///
    /// # Errors
    ///
    /// Returns `ClaudeError::MissingApiKey` for a blank key, or
    /// `ClaudeError::ClientBuild` if the HTTP client cannot be created.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ClaudeError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ClaudeError::MissingApiKey);
        }

        Ok(Self {
            client: build_http_client(DEFAULT_TIMEOUT)?,
            api_key,
            api_url: DEFAULT_API_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Point the client at another base URL (a proxy, or a mock server in tests).
    #[must_use]
    pub fn with_base_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `ClaudeError::ClientBuild` if the HTTP client cannot be rebuilt.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ClaudeError> {
        self.client = build_http_client(timeout)?;
        self.timeout = timeout;
        Ok(self)
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Create messages (non-streaming)
    ///
    /// # Errors
    ///
    /// Returns errors for network failures, timeouts, API errors, or parsing failures
    pub async fn messages(&self, request: MessagesRequest) -> Result<MessagesResponse, ClaudeError> {
        tracing::debug!(model = %request.model, max_tokens = request.max_tokens, "Sending messages request");

        let response = self
            .client
            .post(format!("{}/messages", self.api_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        match response.status() {
            StatusCode::OK => response
                .json::<MessagesResponse>()
                .await
                .map_err(|e| ClaudeError::ResponseParseFailed(e.to_string())),
            StatusCode::TOO_MANY_REQUESTS => Err(ClaudeError::RateLimited),
            StatusCode::UNAUTHORIZED => Err(ClaudeError::Unauthorized),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(ClaudeError::ApiError {
                    status: status.as_u16(),
                    message: error_message(&body),
                })
            }
        }
    }

    fn transport_error(&self, error: &reqwest::Error) -> ClaudeError {
        if error.is_timeout() {
            ClaudeError::Timeout(self.timeout)
        } else {
            ClaudeError::RequestFailed(error.to_string())
        }
    }
}

fn build_http_client(timeout: Duration) -> Result<Client, ClaudeError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ClaudeError::ClientBuild(e.to_string()))
}

/// Prefer the structured `error.message` from the body; fall back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body).map_or_else(
        |_| body.to_string(),
        |parsed| format!("{}: {}", parsed.error.kind, parsed.error.message),
    )
}
