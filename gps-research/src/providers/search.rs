//! Single-call research with search grounding (Gemini).

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{finish_reply, PromptContext, ResearchProvider};
use crate::backend::{LlmBackend, LlmRequest};
use crate::error::Result;
use crate::record::{ProviderId, ResearchRecord};
use crate::retry::{retry, RetryPolicy};
use crate::validator::SourceValidator;

const DEFAULT_NOTE: &str = "Data collected via Gemini with Google Search grounding.";

/// One grounded request per entity, retried on rate limits and transport errors.
pub struct SearchGroundedProvider {
    backend: Arc<dyn LlmBackend>,
    validator: Arc<SourceValidator>,
    policy: RetryPolicy,
}

impl SearchGroundedProvider {
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
impl ResearchProvider for SearchGroundedProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    async fn query(&self, entity: &str, prompts: &PromptContext) -> Result<ResearchRecord> {
        let request = LlmRequest::new(prompts.research_for(entity)).with_web_search();
        info!(entity, model = self.backend.model(), "Querying with search grounding");

        let text = retry(&self.policy, "gemini", |_| self.backend.submit(&request)).await?;
        finish_reply(self.backend.name(), &text, entity, DEFAULT_NOTE, &self.validator).await
    }
}
