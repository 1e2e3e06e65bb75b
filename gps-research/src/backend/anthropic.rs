//! Anthropic Messages API client with extended thinking and web search.
//!
//! Search-heavy requests run long, so the reply is requested as an SSE
//! stream. The stream is collected into a buffer in full, then parsed.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{http_client, LlmBackend, LlmRequest, Reasoning};
use crate::error::{ResearchError, Result};

const BACKEND: &str = "anthropic";
const DEFAULT_MAX_TOKENS: u32 = 16_000;
const WEB_SEARCH_MAX_USES: u32 = 10;

/// Anthropic `/v1/messages` backend.
pub struct AnthropicBackend {
    client: reqwest::Client,
    headers: HeaderMap,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<Thinking>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WebSearchTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Thinking {
    #[serde(rename = "type")]
    kind: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WebSearchTool {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'static str,
    max_uses: u32,
}

/// The subset of stream events that carry reply text or errors.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta { delta: Delta },
    Error { error: StreamError },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    message: String,
}

impl AnthropicBackend {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, "https://api.anthropic.com", 600)
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
            "x-api-key",
            HeaderValue::from_str(api_key).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));

        Self {
            client: http_client(timeout_secs),
            headers,
            model: model.into(),
            base_url: base_url.into(),
        }
    }
}

/// Concatenate the text deltas of a complete SSE transcript.
fn collect_stream_text(transcript: &str) -> Result<String> {
    let mut text = String::new();
    let normalized = transcript.replace("\r\n", "\n");

    for event in normalized.split("\n\n") {
        let Some(data) = event
            .lines()
            .find_map(|line| line.trim().strip_prefix("data:"))
            .map(str::trim)
        else {
            continue;
        };

        match serde_json::from_str::<StreamEvent>(data) {
            Ok(StreamEvent::ContentBlockDelta {
                delta: Delta::TextDelta { text: chunk },
            }) => text.push_str(&chunk),
            Ok(StreamEvent::Error { error }) => {
                return Err(if error.kind == "overloaded_error" || error.kind == "rate_limit_error" {
                    ResearchError::RateLimited {
                        backend: BACKEND.into(),
                        message: error.message,
                    }
                } else {
                    ResearchError::Transport {
                        backend: BACKEND.into(),
                        message: format!("{}: {}", error.kind, error.message),
                    }
                });
            }
            _ => {}
        }
    }
    Ok(text)
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn submit(&self, request: &LlmRequest) -> Result<String> {
        let url = format!("{}/v1/messages", self.base_url);

        let thinking = match request.reasoning {
            Reasoning::Budget(budget) => Some(Thinking {
                kind: "enabled",
                budget_tokens: budget,
            }),
            _ => None,
        };
        let tools = if request.web_search {
            vec![WebSearchTool {
                kind: "web_search_20250305",
                name: "web_search",
                max_uses: WEB_SEARCH_MAX_USES,
            }]
        } else {
            Vec::new()
        };
        // Extended thinking does not accept a custom temperature
        let temperature = if thinking.is_some() {
            None
        } else {
            request.temperature
        };

        let body = MessagesRequest {
            model: &self.model,
            max_tokens: request.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            stream: true,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            thinking,
            tools,
            temperature,
        };

        let response = self
            .client
            .post(&url)
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

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ResearchError::transport(BACKEND, &e))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
        }

        let text = collect_stream_text(&buffer)?;
        if text.trim().is_empty() {
            return Err(ResearchError::malformed(BACKEND, "stream carried no text"));
        }
        tracing::debug!(model = %self.model, chars = text.len(), "Collected streamed reply");
        Ok(text)
    }
}
