//! OpenAI Responses API client with web search and reasoning effort.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{http_client, LlmBackend, LlmRequest, Reasoning};
use crate::error::{ResearchError, Result};

const BACKEND: &str = "openai";

/// OpenAI `/v1/responses` backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    headers: HeaderMap,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningParam<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Tool {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ReasoningParam<'a> {
    effort: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResponsesReply {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

impl OpenAiBackend {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self::with_base_url(api_key, model, "https://api.openai.com", 600)
    }

    pub fn with_base_url(
        api_key: &str,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
            headers.insert(AUTHORIZATION, value);
        }

        Self {
            client: http_client(timeout_secs),
            headers,
            model: model.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn submit(&self, request: &LlmRequest) -> Result<String> {
        let url = format!("{}/v1/responses", self.base_url);

        let tools = if request.web_search {
            vec![Tool {
                kind: "web_search_preview",
            }]
        } else {
            Vec::new()
        };
        let reasoning = match &request.reasoning {
            Reasoning::Effort(effort) => Some(ReasoningParam { effort }),
            Reasoning::Budget(_) => Some(ReasoningParam { effort: "high" }),
            Reasoning::Off => None,
        };
        // Reasoning models reject sampling parameters
        let temperature = if reasoning.is_some() {
            None
        } else {
            request.temperature
        };

        let body = ResponsesRequest {
            model: &self.model,
            input: &request.prompt,
            tools,
            reasoning,
            max_output_tokens: request.max_output_tokens,
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

        let reply: ResponsesReply = response
            .json()
            .await
            .map_err(|e| ResearchError::malformed(BACKEND, format!("Failed to parse response: {e}")))?;

        if let Some(err) = reply.error {
            let code = err.code.unwrap_or_default();
            if code.contains("rate_limit") {
                return Err(ResearchError::RateLimited {
                    backend: BACKEND.into(),
                    message: err.message,
                });
            }
            return Err(ResearchError::malformed(BACKEND, err.message));
        }

        let text: String = reply
            .output
            .into_iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content)
            .filter(|c| c.kind == "output_text")
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(ResearchError::malformed(BACKEND, "reply contained no output text"));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let body = ResponsesRequest {
            model: "gpt-5.2",
            input: "hello",
            tools: vec![Tool {
                kind: "web_search_preview",
            }],
            reasoning: Some(ReasoningParam { effort: "medium" }),
            max_output_tokens: None,
            temperature: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["tools"][0]["type"], "web_search_preview");
        assert_eq!(value["reasoning"]["effort"], "medium");
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn test_reply_text_extraction_shape() {
        let raw = r#"{
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "web_search_call", "status": "completed"},
                {"type": "message", "content": [{"type": "output_text", "text": "{\"a\": 1}"}]}
            ]
        }"#;
        let reply: ResponsesReply = serde_json::from_str(raw).unwrap();
        assert_eq!(reply.output.len(), 3);
        assert_eq!(reply.output[2].content[0].text.as_deref(), Some("{\"a\": 1}"));
    }
}
