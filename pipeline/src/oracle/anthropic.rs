//! Oracle backed by the Anthropic Messages API.

use triage_anthropic::types::Message;
use triage_anthropic::{AnthropicClient, ClaudeError, MessagesRequest};
use triage_core::oracle::{Oracle, OracleError, OracleFuture};

const SYSTEM_PROMPT: &str = "You are an experienced IT Operations engineer. \
You receive problem descriptions reported by monitoring systems. \
For each one, state the likely root cause or the next diagnostic step. \
Answer in at most three concise sentences, without preamble.";

const MAX_TOKENS: u32 = 300;

/// Asks a Claude model to diagnose the ticket payload.
#[derive(Debug, Clone)]
pub struct AnthropicOracle {
    client: AnthropicClient,
    model: String,
}

impl AnthropicOracle {
    /// Oracle using `model` through `client`.
    #[must_use]
    pub fn new(client: AnthropicClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    async fn diagnose(&self, payload: &str) -> Result<String, OracleError> {
        let request = MessagesRequest::new(vec![Message::user(format!(
            "Problem description:\n{payload}"
        ))])
        .with_model(self.model.clone())
        .with_system(SYSTEM_PROMPT)
        .with_max_tokens(MAX_TOKENS);

        let response = self.client.messages(request).await.map_err(oracle_error)?;
        let text = response.text();
        if text.is_empty() {
            return Err(OracleError::EmptyResponse);
        }

        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Received diagnosis"
        );
        Ok(text)
    }
}

impl Oracle for AnthropicOracle {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn analyze<'a>(&'a self, payload: &'a str) -> OracleFuture<'a> {
        Box::pin(self.diagnose(payload))
    }
}

fn oracle_error(error: ClaudeError) -> OracleError {
    match error {
        ClaudeError::Timeout(after) => OracleError::Timeout(after),
        e if e.is_retryable() => OracleError::Unavailable(e.to_string()),
        ClaudeError::ResponseParseFailed(reason) => OracleError::Unavailable(reason),
        e => OracleError::Rejected(e.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn oracle_for(server: &MockServer) -> AnthropicOracle {
        let client = AnthropicClient::new("test-key")
            .unwrap()
            .with_base_url(format!("{}/v1", server.uri()));
        AnthropicOracle::new(client, "claude-sonnet-4-5-20250929")
    }

    fn reply(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "msg_01",
            "model": "claude-sonnet-4-5-20250929",
            "role": "assistant",
            "content": [{"type": "text", "text": text}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 40, "output_tokens": 12}
        }))
    }

    #[tokio::test]
    async fn payload_is_sent_with_system_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(serde_json::json!({
                "model": "claude-sonnet-4-5-20250929",
                "system": SYSTEM_PROMPT,
                "messages": [{"role": "user", "content": [
                    {"type": "text", "text": "Problem description:\ndisk full on db1"}
                ]}]
            })))
            .respond_with(reply("The data volume on db1 is full; clean up WAL archives."))
            .expect(1)
            .mount(&server)
            .await;

        let diagnosis = oracle_for(&server)
            .analyze("disk full on db1")
            .await
            .unwrap();
        assert_eq!(diagnosis, "The data volume on db1 is full; clean up WAL archives.");
    }

    #[tokio::test]
    async fn blank_answer_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(reply("   "))
            .mount(&server)
            .await;

        let err = oracle_for(&server).analyze("x").await.unwrap_err();
        assert_eq!(err, OracleError::EmptyResponse);
    }

    #[tokio::test]
    async fn overload_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529))
            .mount(&server)
            .await;

        let err = oracle_for(&server).analyze("x").await.unwrap_err();
        assert!(matches!(err, OracleError::Unavailable(_)));
    }

    #[tokio::test]
    async fn bad_credentials_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = oracle_for(&server).analyze("x").await.unwrap_err();
        assert!(matches!(err, OracleError::Rejected(_)));
    }

    #[test]
    fn client_timeout_keeps_its_duration() {
        assert_eq!(
            oracle_error(ClaudeError::Timeout(Duration::from_secs(2))),
            OracleError::Timeout(Duration::from_secs(2))
        );
    }
}
