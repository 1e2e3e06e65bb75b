//! GPS Research - multi-provider research pipeline for GPUs per CS student.
//!
//! This crate provides:
//! - LLM wire clients (OpenAI, Anthropic, Gemini)
//! - Research providers with a read-through result cache
//! - Tiered source-URL validation (HTTP, curl, headless browser)
//! - Ensemble aggregation and a post-validation audit
//! - Metric calculation and the ranked CSV report
//!
//! ## Architecture
//!
//! ```text
//!              ┌─ openai ─┐
//! entity ──────┼─ claude ─┼── cache ── merge ── audit ── metrics ── report
//!              └─ gemini ─┘      (sources validated per provider and after merge)
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod backend;
pub mod cache;
pub mod ensemble;
pub mod error;
pub mod extract;
pub mod inputs;
pub mod metrics;
pub mod pipeline;
pub mod post_validate;
pub mod providers;
pub mod record;
pub mod report;
pub mod retry;
pub mod validator;

// Re-export commonly used types
pub use backend::{LlmBackend, LlmRequest, Reasoning};
pub use cache::{ResultCache, AGGREGATE_NAMESPACE, VALIDATED_NAMESPACE};
pub use ensemble::{Aggregated, EnsembleAggregator, MergeMethod};
pub use error::{ResearchError, Result};
pub use inputs::{load_entities, load_prompts, Entity};
pub use metrics::{MetricRow, PriceTable};
pub use pipeline::{select_entities, BatchSummary, Pipeline, RunMode, ValidationSummary};
pub use post_validate::{PostValidator, ValidationOutcome, ValidationStatus};
pub use providers::{PromptContext, ProviderRegistry, ResearchProvider};
pub use record::{GpuModel, ProviderId, ProviderResult, ResearchRecord, Source};
pub use report::ReportRow;
pub use retry::RetryPolicy;
pub use validator::SourceValidator;
