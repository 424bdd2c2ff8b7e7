//! HTTP-level tests for [`AnthropicClient`] against a wiremock server.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::time::Duration;
use triage_anthropic::types::Message;
use triage_anthropic::{AnthropicClient, ClaudeError, MessagesRequest};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> AnthropicClient {
    AnthropicClient::new("test-key")
        .unwrap()
        .with_base_url(format!("{}/v1", server.uri()))
}

fn request() -> MessagesRequest {
    MessagesRequest::new(vec![Message::user("disk full on db1")])
        .with_system("You are an IT operations engineer")
        .with_max_tokens(200)
}

#[tokio::test]
async fn test_successful_response_is_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(serde_json::json!({
            "max_tokens": 200,
            "system": "You are an IT operations engineer",
            "messages": [{"role": "user", "content": [{"type": "text", "text": "disk full on db1"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "msg_01",
            "type": "message",
            "model": "claude-sonnet-4-5-20250929",
            "role": "assistant",
            "content": [{"type": "text", "text": "Free space on /var/lib/postgresql."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 20, "output_tokens": 8}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server).messages(request()).await.unwrap();

    assert_eq!(response.id, "msg_01");
    assert_eq!(response.text(), "Free space on /var/lib/postgresql.");
}

#[tokio::test]
async fn test_rate_limit_maps_to_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let err = client_for(&server).messages(request()).await.unwrap_err();
    assert!(matches!(err, ClaudeError::RateLimited));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unauthorized_is_not_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client_for(&server).messages(request()).await.unwrap_err();
    assert!(matches!(err, ClaudeError::Unauthorized));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_overloaded_carries_structured_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_json(serde_json::json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).messages(request()).await.unwrap_err();
    match err {
        ClaudeError::ApiError { status, ref message } => {
            assert_eq!(status, 529);
            assert_eq!(message, "overloaded_error: Overloaded");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = client_for(&server)
        .with_timeout(Duration::from_millis(100))
        .unwrap();
    let err = client.messages(request()).await.unwrap_err();

    assert!(matches!(err, ClaudeError::Timeout(d) if d == Duration::from_millis(100)));
}

#[tokio::test]
async fn test_malformed_body_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client_for(&server).messages(request()).await.unwrap_err();
    assert!(matches!(err, ClaudeError::ResponseParseFailed(_)));
}
