//! Single-call research with extended thinking and a web-search tool (Claude).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{finish_reply, PromptContext, ResearchProvider};
use crate::backend::{LlmBackend, LlmRequest, Reasoning};
use crate::error::Result;
use crate::record::{ProviderId, ResearchRecord};
use crate::retry::{retry, RetryPolicy};
use crate::validator::SourceValidator;

const THINKING_BUDGET: u32 = 8_000;
const MAX_OUTPUT_TOKENS: u32 = 16_000;
const DEFAULT_NOTE: &str = "Data collected via Claude with web search.";

pub struct ReasoningProvider {
    backend: Arc<dyn LlmBackend>,
    validator: Arc<SourceValidator>,
    policy: RetryPolicy,
}

impl ReasoningProvider {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        validator: Arc<SourceValidator>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            validator,
            policy,
        }
    }
}

#[async_trait]
impl ResearchProvider for ReasoningProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Claude
    }

    async fn query(&self, entity: &str, prompts: &PromptContext) -> Result<ResearchRecord> {
        let request = LlmRequest::new(prompts.research_for(entity))
            .with_web_search()
            .with_reasoning(Reasoning::Budget(THINKING_BUDGET))
            .with_max_output_tokens(MAX_OUTPUT_TOKENS);
        info!(entity, model = self.backend.model(), "Querying with extended thinking");

        let text = retry(&self.policy, "claude", |_| self.backend.submit(&request)).await?;
        finish_reply(self.backend.name(), &text, entity, DEFAULT_NOTE, &self.validator).await
    }
}
