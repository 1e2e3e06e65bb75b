//! Google Gemini `generateContent` client with Google Search grounding.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{http_client, LlmBackend, LlmRequest, Reasoning};
use crate::error::{ResearchError, Result};

const BACKEND: &str = "gemini";

/// Gemini backend.
pub struct GeminiBackend {
    client: reqwest::Client,
    headers: HeaderMap,
    model: String,
    base_url: String,
}

// ══════════════════════════════════════════════════════════════════════════════
// API REQUEST/RESPONSE TYPES
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: EmptyObject,
}

#[derive(Debug, Serialize)]
struct EmptyObject {}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(rename = "thinkingConfig", skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "thinkingBudget")]
    thinking_budget: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason", default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: u16,
    message: String,
}

impl GeminiBackend {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self::with_base_url(
            api_key,
            model,
            "https://generativelanguage.googleapis.com",
            600,
        )
    }

    pub fn with_base_url(
        api_key: &str,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
        );

        Self {
            client: http_client(timeout_secs),
            headers,
            model: model.into(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self) -> String {
        let model = self.model.strip_prefix("models/").unwrap_or(&self.model);
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }
}

/// Join the visible (non-thought) text parts of the first candidate.
fn reply_text(reply: GenerateContentResponse) -> Result<String> {
    if let Some(err) = reply.error {
        return Err(ResearchError::from_status(BACKEND, err.code, &err.message));
    }
    if let Some(reason) = reply.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(ResearchError::Rejected {
            backend: BACKEND.into(),
            status: 400,
            message: format!("prompt blocked: {reason}"),
        });
    }

    let candidate = reply
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ResearchError::malformed(BACKEND, "no candidates returned"))?;

    let text: String = candidate
        .content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| !p.thought)
        .filter_map(|p| p.text)
        .collect();

    if text.trim().is_empty() {
        // Empty content with a finish reason usually means a transient cut-off
        return Err(ResearchError::Transport {
            backend: BACKEND.into(),
            message: format!(
                "empty candidate (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ),
        });
    }
    Ok(text)
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn submit(&self, request: &LlmRequest) -> Result<String> {
        let tools = if request.web_search {
            vec![Tool {
                google_search: EmptyObject {},
            }]
        } else {
            Vec::new()
        };
        let thinking_config = match request.reasoning {
            Reasoning::Budget(budget) => Some(ThinkingConfig {
                thinking_budget: budget,
            }),
            _ => None,
        };
        let generation_config = if request.temperature.is_some()
            || request.max_output_tokens.is_some()
            || thinking_config.is_some()
        {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                thinking_config,
            })
        } else {
            None
        };

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part {
                    text: &request.prompt,
                }],
            }],
            tools,
            generation_config,
        };

        let response = self
            .client
            .post(self.endpoint())
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| ResearchError::transport(BACKEND, &e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ResearchError::from_status(BACKEND, status.as_u16(), &text));
        }

        let reply: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| ResearchError::malformed(BACKEND, format!("Failed to parse response: {e}")))?;

        reply_text(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_strips_models_prefix() {
        let backend = GeminiBackend::with_base_url("k", "models/gemini-2.0-flash", "http://x", 5);
        assert_eq!(
            backend.endpoint(),
            "http://x/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn test_reply_text_skips_thoughts() {
        let raw = r#"{"candidates": [{"content": {"parts": [
            {"text": "thinking...", "thought": true},
            {"text": "{\"a\": "},
            {"text": "1}"}
        ]}, "finishReason": "STOP"}]}"#;
        let reply: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(reply_text(reply).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_empty_candidate_is_retriable() {
        let raw = r#"{"candidates": [{"finishReason": "OTHER"}]}"#;
        let reply: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert!(reply_text(reply).unwrap_err().is_retriable());
    }

    #[test]
    fn test_blocked_prompt_is_rejected() {
        let raw = r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#;
        let reply: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            reply_text(reply),
            Err(ResearchError::Rejected { .. })
        ));
    }

    #[test]
    fn test_search_tool_serialization() {
        let body = GenerateContentRequest {
            contents: vec![],
            tools: vec![Tool {
                google_search: EmptyObject {},
            }],
            generation_config: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["tools"][0]["google_search"], serde_json::json!({}));
        assert!(value.get("generationConfig").is_none());
    }
}
