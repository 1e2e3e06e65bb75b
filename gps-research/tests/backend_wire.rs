//! Wire-format tests for the LLM clients against a local mock server.

use gps_research::backend::{AnthropicBackend, GeminiBackend, OpenAiBackend};
use gps_research::{LlmBackend, LlmRequest, Reasoning, ResearchError};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_openai_responses_request_and_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "gpt-test",
            "tools": [{"type": "web_search_preview"}],
            "reasoning": {"effort": "medium"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": [
                {"type": "web_search_call", "content": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "{\"phd_cs_count\": 120}"}
                ]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiBackend::with_base_url("sk-test", "gpt-test", server.uri(), 30);
    let request = LlmRequest::new("students?")
        .with_web_search()
        .with_reasoning(Reasoning::Effort("medium".into()));
    let text = backend.submit(&request).await.unwrap();
    assert_eq!(text, "{\"phd_cs_count\": 120}");
}

#[tokio::test]
async fn test_openai_429_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let backend = OpenAiBackend::with_base_url("sk-test", "gpt-test", server.uri(), 30);
    let err = backend.submit(&LlmRequest::new("x")).await.unwrap_err();
    assert!(matches!(err, ResearchError::RateLimited { .. }));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn test_gemini_grounded_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-test:generateContent"))
        .and(header("x-goog-api-key", "g-key"))
        .and(body_partial_json(json!({
            "contents": [{"role": "user", "parts": [{"text": "gpus?"}]}],
            "tools": [{"google_search": {}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "```json\n{\"a100_80gb_count\": 64}\n```"}
                ]},
                "finishReason": "STOP"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = GeminiBackend::with_base_url("g-key", "models/gemini-test", server.uri(), 30);
    let text = backend
        .submit(&LlmRequest::new("gpus?").with_web_search())
        .await
        .unwrap();
    assert_eq!(text, "```json\n{\"a100_80gb_count\": 64}\n```");
}

#[tokio::test]
async fn test_gemini_resource_exhausted_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_string(r#"{"error": {"status": "RESOURCE_EXHAUSTED"}}"#),
        )
        .mount(&server)
        .await;

    let backend = GeminiBackend::with_base_url("g-key", "gemini-test", server.uri(), 30);
    let err = backend.submit(&LlmRequest::new("x")).await.unwrap_err();
    assert!(matches!(err, ResearchError::RateLimited { .. }));
}

#[tokio::test]
async fn test_anthropic_stream_collected() {
    let transcript = "event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"{\\\"undergrad_cs_count\\\": \"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"800}\"}}\n\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\n";

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "ant-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({
            "stream": true,
            "thinking": {"type": "enabled", "budget_tokens": 8000}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(transcript),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = AnthropicBackend::with_base_url("ant-key", "claude-test", server.uri(), 30);
    let request = LlmRequest::new("students?")
        .with_reasoning(Reasoning::Budget(8000))
        .with_max_output_tokens(16000);
    let text = backend.submit(&request).await.unwrap();
    assert_eq!(text, "{\"undergrad_cs_count\": 800}");
}

#[tokio::test]
async fn test_anthropic_401_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
        .mount(&server)
        .await;

    let backend = AnthropicBackend::with_base_url("bad", "claude-test", server.uri(), 30);
    let err = backend.submit(&LlmRequest::new("x")).await.unwrap_err();
    assert!(matches!(err, ResearchError::Rejected { status: 401, .. }));
    assert!(!err.is_retriable());
}
