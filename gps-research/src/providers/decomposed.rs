//! Two focused requests per entity, enrollment then GPU inventory (OpenAI).
//!
//! Each half is parsed independently; a half whose reply carries no JSON
//! object contributes nothing rather than failing the entity.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use super::prompts::{gpu_prompt, student_prompt};
use super::{today, PromptContext, ResearchProvider};
use crate::backend::{LlmBackend, LlmRequest, Reasoning};
use crate::error::Result;
use crate::extract::extract_json_object;
use crate::record::{ProviderId, ResearchRecord};
use crate::retry::{retry, RetryPolicy};
use crate::validator::SourceValidator;

const REASONING_EFFORT: &str = "medium";
const ANALYSIS_NOTE: &str =
    "Data collected via multi-query approach: separate student and GPU searches.";

pub struct DecomposedProvider {
    backend: Arc<dyn LlmBackend>,
    validator: Arc<SourceValidator>,
    policy: RetryPolicy,
}

impl DecomposedProvider {
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

    async fn ask(&self, label: &str, prompt: String) -> Result<String> {
        let request = LlmRequest::new(prompt)
            .with_web_search()
            .with_reasoning(Reasoning::Effort(REASONING_EFFORT.into()));
        retry(&self.policy, label, |_| self.backend.submit(&request)).await
    }
}

/// The reply's JSON object, or an empty map when there is none.
fn parse_half(text: &str, half: &str, entity: &str) -> Map<String, Value> {
    match extract_json_object(text) {
        Some(Value::Object(map)) => map,
        _ => {
            warn!(entity, half, "Could not parse JSON from reply half");
            Map::new()
        }
    }
}

fn field(map: &Map<String, Value>, key: &str, default: Value) -> Value {
    map.get(key).cloned().unwrap_or(default)
}

/// Combine the student and GPU halves into one reply-shaped document.
pub(crate) fn combine_halves(
    entity: &str,
    student: &Map<String, Value>,
    mut gpu: Map<String, Value>,
) -> Value {
    let mut sources = match gpu.remove("sources") {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };

    let student_url = student
        .get("source_url")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty());
    if let Some(url) = student_url {
        let count = |key: &str| field(student, key, json!(0));
        sources.push(json!({
            "url": url,
            "data_found": format!(
                "Student enrollment: {} undergrad, {} grad, {} PhD",
                count("undergrad_cs_count"),
                count("grad_cs_count"),
                count("phd_cs_count"),
            ),
        }));
    }

    json!({
        "university_name": entity,
        "sources": sources,
        "student_data": {
            "undergrad_cs_count": field(student, "undergrad_cs_count", json!(0)),
            "grad_cs_count": field(student, "grad_cs_count", json!(0)),
            "phd_cs_count": field(student, "phd_cs_count", json!(0)),
            "year": field(student, "year", json!("Unknown")),
            "source_url": field(student, "source_url", json!("")),
            "notes": field(student, "notes", json!("")),
        },
        "gpu_resources": gpu,
        "compute_credits": {
            "total_annual_value_usd": 0.0,
            "description": "Not searched in this query.",
        },
        "analysis_notes": ANALYSIS_NOTE,
    })
}

#[async_trait]
impl ResearchProvider for DecomposedProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenAi
    }

    async fn query(&self, entity: &str, _prompts: &PromptContext) -> Result<ResearchRecord> {
        info!(entity, model = self.backend.model(), "Query 1/2: student data");
        let student_text = self.ask("openai:students", student_prompt(entity)).await?;

        info!(entity, model = self.backend.model(), "Query 2/2: GPU data");
        let gpu_text = self.ask("openai:gpus", gpu_prompt(entity)).await?;

        let student = parse_half(&student_text, "students", entity);
        let gpu = parse_half(&gpu_text, "gpus", entity);
        let combined = combine_halves(entity, &student, gpu);

        let mut record = ResearchRecord::from_reply(&combined, entity, today())?;
        self.validator.apply(&mut record).await;
        Ok(record)
    }
}
