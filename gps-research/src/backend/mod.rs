//! LLM wire clients.
//!
//! Each backend turns an [`LlmRequest`] into one HTTP exchange and returns
//! the reply's plain text. Retrying, JSON extraction and normalization live
//! above this layer.

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use gps_common::config::{BackendConfig, Config, StageBackendConfig};

use crate::error::{ResearchError, Result};

/// How much hidden reasoning the backend may spend.
#[derive(Debug, Clone, PartialEq)]
pub enum Reasoning {
    Off,
    /// Named effort level ("low", "medium", "high")
    Effort(String),
    /// Explicit thinking-token budget
    Budget(u32),
}

/// One prompt submission.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    /// Enable the backend's web-search tool
    pub web_search: bool,
    pub reasoning: Reasoning,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            web_search: false,
            reasoning: Reasoning::Off,
            max_output_tokens: None,
            temperature: None,
        }
    }

    pub fn with_web_search(mut self) -> Self {
        self.web_search = true;
        self
    }

    pub fn with_reasoning(mut self, reasoning: Reasoning) -> Self {
        self.reasoning = reasoning;
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A text-in, text-out LLM endpoint.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Backend key ("openai", "anthropic", "gemini").
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Submit the prompt and return the reply text.
    async fn submit(&self, request: &LlmRequest) -> Result<String>;
}

pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn base_url(backend: &BackendConfig, default: &str) -> String {
    backend
        .base_url
        .as_deref()
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Build the client for a backend key and model, failing fast without credentials.
pub fn build_backend(key: &str, model: &str, config: &Config) -> Result<Arc<dyn LlmBackend>> {
    let (backend, default_url) =
        config
            .providers
            .backend(key)
            .ok_or_else(|| ResearchError::Rejected {
                backend: key.to_string(),
                status: 0,
                message: "unknown backend".into(),
            })?;
    let api_key = config
        .secrets
        .llm
        .key_for(key)
        .ok_or_else(|| ResearchError::AuthMissing {
            backend: key.to_string(),
        })?;
    let url = base_url(backend, default_url);

    let client: Arc<dyn LlmBackend> = match key {
        "openai" => Arc::new(OpenAiBackend::with_base_url(
            api_key,
            model,
            url,
            backend.timeout_secs,
        )),
        "anthropic" | "claude" => Arc::new(AnthropicBackend::with_base_url(
            api_key,
            model,
            url,
            backend.timeout_secs,
        )),
        _ => Arc::new(GeminiBackend::with_base_url(
            api_key,
            model,
            url,
            backend.timeout_secs,
        )),
    };
    Ok(client)
}

/// Build the backend selected for a secondary stage (merge or validation).
pub fn build_stage_backend(
    stage: &StageBackendConfig,
    config: &Config,
) -> Result<Arc<dyn LlmBackend>> {
    build_backend(&stage.backend, &stage.model, config)
}

/// Request template for a secondary stage.
pub fn stage_request(stage: &StageBackendConfig, prompt: String) -> LlmRequest {
    let mut request = LlmRequest::new(prompt);
    request.web_search = stage.web_search;
    request.temperature = stage.temperature;
    request.max_output_tokens = stage.max_output_tokens;
    request
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_backend_requires_key() {
        let config = Config::default();
        let err = build_backend("openai", "gpt-5.2", &config).err().unwrap();
        assert!(err.is_auth_missing());
    }

    #[test]
    fn test_build_backend_with_key() {
        let mut config = Config::default();
        config.secrets.llm.google = Some("test-key".into());
        let backend = build_backend("gemini", "gemini-2.0-flash", &config).unwrap();
        assert_eq!(backend.name(), "gemini");
        assert_eq!(backend.model(), "gemini-2.0-flash");
    }

    #[test]
    fn test_stage_request_copies_settings() {
        let config = Config::default();
        let request = stage_request(&config.providers.validation, "check".into());
        assert!(!request.web_search);
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.max_output_tokens, Some(4096));
        assert_eq!(request.reasoning, Reasoning::Off);
    }
}
