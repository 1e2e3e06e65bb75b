//! Second-pass audit that strips shared or national GPUs from a record.
//!
//! Only `gpu_resources` may change, and counts may only go down; student
//! data, sources and credits are always kept from the input.

use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use gps_common::config::StageBackendConfig;

use crate::backend::{stage_request, LlmBackend};
use crate::error::{ResearchError, Result};
use crate::extract::extract_json_object;
use crate::providers::prompts::validation_prompt;
use crate::record::{GpuModel, ResearchRecord};

/// `validation_notes` value when the audit found nothing to remove.
pub const NO_CHANGES: &str = "No changes needed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    Unchanged,
    Changed,
    /// Reply unusable or backend failed; input kept
    Failed,
    /// No validation backend configured
    Skipped,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationStatus::Unchanged => "unchanged",
            ValidationStatus::Changed => "changed",
            ValidationStatus::Failed => "failed",
            ValidationStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Validated record plus the GPU fields that changed (`field: old -> new`).
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub record: ResearchRecord,
    pub changes: Vec<String>,
    pub status: ValidationStatus,
}

pub struct PostValidator {
    backend: Option<Arc<dyn LlmBackend>>,
    stage: StageBackendConfig,
    template: String,
}

impl PostValidator {
    pub fn new(
        backend: Option<Arc<dyn LlmBackend>>,
        stage: StageBackendConfig,
        template: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            stage,
            template: template.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn validate(&self, record: &ResearchRecord) -> ValidationOutcome {
        let entity = record.entity_name.as_str();
        let Some(backend) = &self.backend else {
            let mut kept = record.clone();
            kept.validation_notes = Some("Validation skipped: no validation backend configured".into());
            return ValidationOutcome {
                record: kept,
                changes: Vec::new(),
                status: ValidationStatus::Skipped,
            };
        };

        let reply = match validation_prompt(&self.template, record) {
            Ok(prompt) => backend.submit(&stage_request(&self.stage, prompt)).await,
            Err(e) => Err(e),
        };

        let text = match reply {
            Ok(text) => text,
            Err(e) => {
                warn!(entity, error = %e, "Validation call failed");
                return failed(record, format!("Validation error: {e}"));
            }
        };

        match apply_reply(record, &text) {
            Ok((validated, changes)) => {
                let status = if changes.is_empty()
                    && validated.validation_notes.as_deref() == Some(NO_CHANGES)
                {
                    ValidationStatus::Unchanged
                } else {
                    ValidationStatus::Changed
                };
                if changes.is_empty() {
                    info!(entity, "No GPU changes");
                } else {
                    info!(entity, changes = %changes.join(", "), "GPU counts reduced");
                }
                ValidationOutcome {
                    record: validated,
                    changes,
                    status,
                }
            }
            Err(e) => {
                warn!(entity, error = %e, "Validation reply unusable");
                failed(record, format!("Validation failed: {e}"))
            }
        }
    }
}

fn failed(record: &ResearchRecord, note: String) -> ValidationOutcome {
    let mut kept = record.clone();
    kept.validation_notes = Some(note);
    ValidationOutcome {
        record: kept,
        changes: Vec::new(),
        status: ValidationStatus::Failed,
    }
}

/// Merge a validation reply into `original`, keeping everything but GPU data.
pub fn apply_reply(original: &ResearchRecord, text: &str) -> Result<(ResearchRecord, Vec<String>)> {
    let value = extract_json_object(text)
        .ok_or_else(|| ResearchError::ValidationParseFailure("no JSON object in reply".into()))?;
    let parsed = ResearchRecord::from_reply(&value, &original.entity_name, original.retrieved_date)
        .map_err(|e| ResearchError::ValidationParseFailure(e.to_string()))?;

    let mut validated = original.clone();
    let mut changes = Vec::new();

    if let Some(gpus) = value.get("gpu_resources").and_then(|v| v.as_object()) {
        for model in GpuModel::ALL {
            let before = original.gpus.count(model);
            if !gpus.contains_key(model.count_field()) {
                continue;
            }
            let after = parsed.gpus.count(model).min(before);
            if after != before {
                changes.push(format!("{}: {before} -> {after}", model.count_field()));
                validated.gpus.set_count(model, after);
            }
        }
        if gpus.contains_key("other_high_vram_gpus") {
            validated.gpus.other_high_vram_gpus = parsed.gpus.other_high_vram_gpus.clone();
        }
        if !parsed.gpus.notes.is_empty() {
            validated.gpus.notes = parsed.gpus.notes.clone();
        }
    }

    validated.validation_notes = Some(
        parsed
            .validation_notes
            .unwrap_or_else(|| NO_CHANGES.to_string()),
    );
    Ok((validated, changes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use crate::backend::LlmRequest;
    use gps_common::config::Config;

    fn record() -> ResearchRecord {
        let mut record =
            ResearchRecord::empty("Test University", NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
        record.students.undergrad = 1000;
        record.students.masters = 300;
        record.gpus.h100_sxm_count = 64;
        record.gpus.a100_80gb_count = 32;
        record
    }

    struct CannedBackend(std::result::Result<String, u16>);

    #[async_trait]
    impl LlmBackend for CannedBackend {
        fn name(&self) -> &str {
            "canned"
        }

        fn model(&self) -> &str {
            "canned-1"
        }

        async fn submit(&self, _request: &LlmRequest) -> Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(status) => Err(ResearchError::from_status("canned", *status, "boom")),
            }
        }
    }

    fn validator(reply: std::result::Result<&str, u16>) -> PostValidator {
        PostValidator::new(
            Some(Arc::new(CannedBackend(reply.map(str::to_string)))),
            Config::default().providers.validation,
            "AUDIT",
        )
    }

    #[test]
    fn test_counts_only_decrease() {
        let reply = r#"{"student_data": {"undergrad_cs_count": 1},
            "gpu_resources": {"h100_sxm_count": 0, "a100_80gb_count": 99},
            "validation_notes": "Removed 64 H100 on the national system"}"#;
        let (validated, changes) = apply_reply(&record(), reply).unwrap();

        assert_eq!(validated.gpus.h100_sxm_count, 0);
        assert_eq!(validated.gpus.a100_80gb_count, 32);
        assert_eq!(validated.students.undergrad, 1000);
        assert_eq!(changes, vec!["h100_sxm_count: 64 -> 0"]);
        assert_eq!(
            validated.validation_notes.as_deref(),
            Some("Removed 64 H100 on the national system")
        );
    }

    #[test]
    fn test_missing_fields_kept() {
        let (validated, changes) = apply_reply(&record(), "```json\n{}\n```").unwrap();
        assert!(changes.is_empty());
        assert_eq!(validated.gpus, record().gpus);
        assert_eq!(validated.validation_notes.as_deref(), Some(NO_CHANGES));
    }

    #[tokio::test]
    async fn test_unparsable_reply_marks_failure() {
        let outcome = validator(Ok("Sorry, I cannot help with that.")).validate(&record()).await;
        assert_eq!(outcome.status, ValidationStatus::Failed);
        assert_eq!(outcome.record.gpus, record().gpus);
        assert!(outcome
            .record
            .validation_notes
            .unwrap()
            .starts_with("Validation failed:"));
    }

    #[tokio::test]
    async fn test_backend_failure_marks_error() {
        let outcome = validator(Err(500)).validate(&record()).await;
        assert_eq!(outcome.status, ValidationStatus::Failed);
        assert!(outcome
            .record
            .validation_notes
            .unwrap()
            .starts_with("Validation error:"));
    }

    #[tokio::test]
    async fn test_unchanged_status() {
        let outcome = validator(Ok(r#"{"gpu_resources": {"h100_sxm_count": 64}}"#))
            .validate(&record())
            .await;
        assert_eq!(outcome.status, ValidationStatus::Unchanged);
        assert!(outcome.changes.is_empty());
    }

    #[tokio::test]
    async fn test_skipped_without_backend() {
        let validator = PostValidator::new(None, Config::default().providers.validation, "AUDIT");
        let outcome = validator.validate(&record()).await;
        assert_eq!(outcome.status, ValidationStatus::Skipped);
        assert_eq!(outcome.record.gpus, record().gpus);
    }
}
