//! Ensemble aggregation: fan out to every provider, merge with an LLM,
//! then enforce the numeric maximum in code.

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};

use gps_common::config::StageBackendConfig;

use crate::backend::{stage_request, LlmBackend};
use crate::cache::{ResultCache, AGGREGATE_NAMESPACE};
use crate::error::Result;
use crate::extract::extract_json_object;
use crate::providers::prompts::merge_prompt;
use crate::providers::{query_cached, today, PromptContext, ProviderRegistry};
use crate::record::{GpuModel, ProviderId, ProviderResult, ResearchRecord};
use crate::validator::SourceValidator;

static YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap());

/// How the aggregate record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMethod {
    /// Served from the aggregate cache
    Cached,
    /// Merged by the designated backend
    Llm,
    /// Merge reply unusable or backend unavailable; best single result kept
    BestSingle,
}

/// Output of one aggregation.
#[derive(Debug, Clone)]
pub struct Aggregated {
    pub record: ResearchRecord,
    pub method: MergeMethod,
    /// Providers that returned a result
    pub providers: Vec<ProviderId>,
    /// Whether any network call was made
    pub network_used: bool,
}

pub struct EnsembleAggregator {
    registry: Arc<ProviderRegistry>,
    cache: Arc<ResultCache>,
    merger: Option<Arc<dyn LlmBackend>>,
    merge_stage: StageBackendConfig,
    validator: Arc<SourceValidator>,
}

impl EnsembleAggregator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: Arc<ResultCache>,
        merger: Option<Arc<dyn LlmBackend>>,
        merge_stage: StageBackendConfig,
        validator: Arc<SourceValidator>,
    ) -> Self {
        Self {
            registry,
            cache,
            merger,
            merge_stage,
            validator,
        }
    }

    /// Aggregate every provider's view of `entity`; `None` when no provider succeeded.
    pub async fn aggregate(
        &self,
        entity: &str,
        prompts: &PromptContext,
    ) -> Result<Option<Aggregated>> {
        if let Some(record) = self.cache.get::<ResearchRecord>(AGGREGATE_NAMESPACE, entity)? {
            info!(entity, "Loaded aggregate from cache");
            return Ok(Some(Aggregated {
                record,
                method: MergeMethod::Cached,
                providers: Vec::new(),
                network_used: false,
            }));
        }

        let providers = self.registry.all();
        info!(entity, providers = providers.len(), "Running providers concurrently");

        let outcomes = join_all(
            providers
                .iter()
                .map(|p| query_cached(p.as_ref(), &self.cache, entity, prompts)),
        )
        .await;

        let mut results = Vec::new();
        let mut network_used = false;
        for (provider, outcome) in providers.iter().zip(outcomes) {
            match outcome {
                Ok(fetched) => {
                    info!(entity, provider = %provider.id(), cached = fetched.from_cache, "Provider completed");
                    network_used |= !fetched.from_cache;
                    results.push(fetched.result);
                }
                Err(e) => {
                    network_used = true;
                    warn!(entity, provider = %provider.id(), error = %e, "Provider failed");
                }
            }
        }

        if results.is_empty() {
            warn!(entity, "All providers failed");
            return Ok(None);
        }

        let (mut record, method, persist) = self.merge(entity, &results).await;
        network_used |= self.merger.is_some();

        enforce_maximum(&mut record, &results);
        let names: Vec<&str> = results.iter().map(|r| r.provider.as_str()).collect();
        if record.notes.is_empty() {
            record.notes = format!(
                "Ensemble result from {} models: {}",
                results.len(),
                names.join(", ")
            );
        }

        self.validator.apply(&mut record).await;

        if persist {
            self.cache.put(AGGREGATE_NAMESPACE, entity, &record)?;
        }
        info!(entity, method = ?method, providers = ?names, "Aggregation complete");

        Ok(Some(Aggregated {
            record,
            method,
            providers: results.iter().map(|r| r.provider).collect(),
            network_used,
        }))
    }

    /// Ask the merge backend; fall back to the best single result.
    /// The flag says whether the outcome may be persisted: a merge call that
    /// failed is retried on the next run, anything else is final.
    async fn merge(
        &self,
        entity: &str,
        results: &[ProviderResult],
    ) -> (ResearchRecord, MergeMethod, bool) {
        let best = || {
            best_single(results)
                .map(|r| r.record.clone())
                .unwrap_or_else(|| ResearchRecord::empty(entity, today()))
        };

        let Some(merger) = &self.merger else {
            info!(entity, "No merge backend configured, using best single result");
            return (best(), MergeMethod::BestSingle, true);
        };

        let prompt = match merge_prompt(entity, results) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(entity, error = %e, "Could not build merge prompt");
                return (best(), MergeMethod::BestSingle, false);
            }
        };

        info!(entity, results = results.len(), model = merger.model(), "Merging results");
        let text = match merger.submit(&stage_request(&self.merge_stage, prompt)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(entity, error = %e, "Merge failed, using best single result");
                return (best(), MergeMethod::BestSingle, false);
            }
        };

        let merged = extract_json_object(&text)
            .and_then(|value| ResearchRecord::from_reply(&value, entity, today()).ok());
        match merged {
            Some(record) => (record, MergeMethod::Llm, true),
            None => {
                warn!(entity, "Failed to parse merged JSON, using best single result");
                (best(), MergeMethod::BestSingle, true)
            }
        }
    }
}

/// The result with the most positive numeric fields; ties go to the earliest.
pub fn best_single(results: &[ProviderResult]) -> Option<&ProviderResult> {
    results
        .iter()
        .rev()
        .max_by_key(|r| r.record.positive_field_count())
}

/// Latest four-digit year named in an enrollment year label ("Fall 2024", "2023-2024").
fn latest_year(label: &str) -> Option<u32> {
    YEAR.find_iter(label)
        .filter_map(|m| m.as_str().parse().ok())
        .max()
}

/// Raise every count to the maximum any provider reported, keep the most
/// recent enrollment year, and union the sources.
pub fn enforce_maximum(record: &mut ResearchRecord, results: &[ProviderResult]) {
    for result in results {
        let other = &result.record;
        record.students.undergrad = record.students.undergrad.max(other.students.undergrad);
        record.students.masters = record.students.masters.max(other.students.masters);
        record.students.phd = record.students.phd.max(other.students.phd);

        for model in GpuModel::ALL {
            let count = record.gpus.count(model).max(other.gpus.count(model));
            record.gpus.set_count(model, count);
        }

        if other.compute_credits.total_annual_value_usd > record.compute_credits.total_annual_value_usd {
            record.compute_credits = other.compute_credits.clone();
        }
        if latest_year(&other.students.year) > latest_year(&record.students.year) {
            record.students.year = other.students.year.clone();
        }
        for source in &other.sources {
            record.add_source(source.clone());
        }
    }
}
