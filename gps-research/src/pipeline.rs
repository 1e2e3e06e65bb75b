//! Batch driver: research every entity in turn, validate, and keep the report current.
//!
//! Entities are processed strictly one after another. After an entity that
//! needed network work the driver sleeps for the configured cool-down, and
//! every `checkpoint_every` entities it rewrites the report from the cache.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Instrument};

use gps_common::config::{Config, StageBackendConfig};
use gps_common::Error;

use crate::backend::{build_stage_backend, LlmBackend};
use crate::cache::{ResultCache, AGGREGATE_NAMESPACE, VALIDATED_NAMESPACE};
use crate::ensemble::EnsembleAggregator;
use crate::error::{ResearchError, Result};
use crate::inputs::Entity;
use crate::metrics::PriceTable;
use crate::post_validate::{PostValidator, ValidationStatus};
use crate::providers::{query_cached, PromptContext, ProviderRegistry};
use crate::record::{ProviderId, ProviderResult, ResearchRecord};
use crate::report::{build_rows, log_leaderboard, write_report, ReportRow};
use crate::validator::SourceValidator;

/// Pause between records in a batch validation pass.
const VALIDATION_PACING: Duration = Duration::from_secs(1);

// ============================================================================
// Run Mode
// ============================================================================

/// Which providers a batch run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One provider, through its own cache namespace
    Single(ProviderId),
    /// Every provider, merged and post-validated
    Ensemble,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Single(id) => write!(f, "{id}"),
            RunMode::Ensemble => f.write_str("ensemble"),
        }
    }
}

impl FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ensemble") {
            return Ok(RunMode::Ensemble);
        }
        ProviderId::from_str(s)
            .map(RunMode::Single)
            .map_err(|_| Error::Config(format!("unknown provider '{s}'")))
    }
}

// ============================================================================
// Summaries
// ============================================================================

/// Post-validation counts. `success` includes `changed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub success: usize,
    pub changed: usize,
    pub error: usize,
    pub skipped: usize,
}

impl ValidationSummary {
    pub fn record(&mut self, status: ValidationStatus) {
        match status {
            ValidationStatus::Unchanged => self.success += 1,
            ValidationStatus::Changed => {
                self.success += 1;
                self.changed += 1;
            }
            ValidationStatus::Failed => self.error += 1,
            ValidationStatus::Skipped => self.skipped += 1,
        }
    }
}

impl fmt::Display for ValidationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} validated, {} changed, {} errors",
            self.success, self.changed, self.error
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        Ok(())
    }
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub processed: usize,
    /// Entities served entirely from cache
    pub from_cache: usize,
    pub failed: Vec<String>,
    pub validation: ValidationSummary,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed ({} from cache), {} failed; {}",
            self.processed,
            self.from_cache,
            self.failed.len(),
            self.validation
        )
    }
}

/// One entity's result within a run.
#[derive(Debug, Clone)]
pub struct EntityOutcome {
    pub record: ResearchRecord,
    pub network_used: bool,
    pub validation: Option<ValidationStatus>,
}

/// Pick the entities named by `filter` (case-insensitive); a name not in the
/// list is researched on its own.
pub fn select_entities(entities: &[Entity], filter: Option<&str>) -> Vec<Entity> {
    let Some(name) = filter.map(str::trim).filter(|n| !n.is_empty()) else {
        return entities.to_vec();
    };
    let matched: Vec<Entity> = entities
        .iter()
        .filter(|e| e.name.eq_ignore_ascii_case(name))
        .cloned()
        .collect();
    if matched.is_empty() {
        vec![Entity::new(name)]
    } else {
        matched
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    cache: Arc<ResultCache>,
    aggregator: EnsembleAggregator,
    post_validator: PostValidator,
    prices: PriceTable,
    prompts: PromptContext,
    validation_pacing: Duration,
}

fn stage_backend(
    label: &str,
    stage: &StageBackendConfig,
    config: &Config,
) -> Option<Arc<dyn LlmBackend>> {
    match build_stage_backend(stage, config) {
        Ok(backend) => {
            info!(stage = label, backend = backend.name(), model = backend.model(), "Stage backend ready");
            Some(backend)
        }
        Err(e) => {
            warn!(stage = label, error = %e, "Stage backend unavailable");
            None
        }
    }
}

impl Pipeline {
    /// Wire every component from configuration.
    pub fn from_config(config: Config, prompts: PromptContext) -> Result<Self> {
        let validator = Arc::new(SourceValidator::from_config(&config.validator)?);
        info!(
            overrides = validator.overrides().len(),
            browser = config.validator.browser_enabled,
            "Source validator ready"
        );
        let registry = Arc::new(ProviderRegistry::from_config(&config, Arc::clone(&validator)));

        let (merger, auditor) = if registry.is_mock() {
            (None, None)
        } else {
            (
                stage_backend("merge", &config.providers.merge, &config),
                stage_backend("validation", &config.providers.validation, &config),
            )
        };
        let prices = PriceTable::load(&config.paths.gpu_prices_path())?;

        Ok(Self::new(
            config, registry, validator, merger, auditor, prices, prompts,
        ))
    }

    /// Assemble a pipeline from already-built parts.
    pub fn new(
        config: Config,
        registry: Arc<ProviderRegistry>,
        validator: Arc<SourceValidator>,
        merger: Option<Arc<dyn LlmBackend>>,
        auditor: Option<Arc<dyn LlmBackend>>,
        prices: PriceTable,
        prompts: PromptContext,
    ) -> Self {
        let cache = Arc::new(ResultCache::new(config.paths.cache_root()));
        let aggregator = EnsembleAggregator::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            merger,
            config.providers.merge.clone(),
            validator,
        );
        let post_validator = PostValidator::new(
            auditor,
            config.providers.validation.clone(),
            prompts.validation_template.clone(),
        );
        Self {
            config: Arc::new(config),
            registry,
            cache,
            aggregator,
            post_validator,
            prices,
            prompts,
            validation_pacing: VALIDATION_PACING,
        }
    }

    pub fn with_validation_pacing(mut self, pacing: Duration) -> Self {
        self.validation_pacing = pacing;
        self
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn cooldown(&self, mode: RunMode) -> Duration {
        let secs = match mode {
            RunMode::Single(ProviderId::Gemini) => self.config.research.gemini_cooldown_secs,
            _ => self.config.research.cooldown_secs,
        };
        Duration::from_secs(secs)
    }

    /// Research one entity. `None` when no usable result could be produced.
    pub async fn process_entity(&self, entity: &str, mode: RunMode) -> Result<Option<EntityOutcome>> {
        match mode {
            RunMode::Single(id) => self.process_single(entity, id).await,
            RunMode::Ensemble => self.process_ensemble(entity).await,
        }
    }

    async fn process_single(&self, entity: &str, id: ProviderId) -> Result<Option<EntityOutcome>> {
        let provider = self.registry.resolve(id).ok_or_else(|| {
            ResearchError::from(Error::Config(format!("provider '{id}' is not available for this run")))
        })?;
        let fetched = query_cached(provider.as_ref(), &self.cache, entity, &self.prompts).await?;
        if !fetched.result.record.is_usable() {
            return Ok(None);
        }
        Ok(Some(EntityOutcome {
            record: fetched.result.record,
            network_used: !fetched.from_cache,
            validation: None,
        }))
    }

    async fn process_ensemble(&self, entity: &str) -> Result<Option<EntityOutcome>> {
        if let Some(record) = self
            .cache
            .get_usable::<ResearchRecord>(VALIDATED_NAMESPACE, entity)?
        {
            info!(entity, "Loaded validated record from cache");
            return Ok(Some(EntityOutcome {
                record,
                network_used: false,
                validation: None,
            }));
        }

        let Some(aggregated) = self.aggregator.aggregate(entity, &self.prompts).await? else {
            return Ok(None);
        };

        let outcome = self.post_validator.validate(&aggregated.record).await;
        if matches!(
            outcome.status,
            ValidationStatus::Unchanged | ValidationStatus::Changed
        ) {
            self.cache.put(VALIDATED_NAMESPACE, entity, &outcome.record)?;
        }

        Ok(Some(EntityOutcome {
            record: outcome.record,
            network_used: aggregated.network_used || self.post_validator.is_enabled(),
            validation: Some(outcome.status),
        }))
    }

    /// Process `entities` in order; one entity's failure never stops the batch.
    pub async fn run(&self, entities: &[Entity], mode: RunMode) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();
        let total = entities.len();
        let checkpoint_every = self.config.research.checkpoint_every.max(1);
        info!(entities = total, mode = %mode, mock = self.registry.is_mock(), "Starting batch");

        for (i, entity) in entities.iter().enumerate() {
            let name = entity.name.as_str();
            info!(entity = name, progress = format!("{}/{}", i + 1, total), "Processing");

            let mut network_used = true;
            let span = gps_common::entity_span!(name, mode, index = i + 1);
            match self.process_entity(name, mode).instrument(span).await {
                Ok(Some(outcome)) => {
                    summary.processed += 1;
                    network_used = outcome.network_used;
                    if !network_used {
                        summary.from_cache += 1;
                    }
                    if let Some(status) = outcome.validation {
                        summary.validation.record(status);
                    }
                    info!(
                        entity = name,
                        undergrad = outcome.record.students.undergrad,
                        masters = outcome.record.students.masters,
                        phd = outcome.record.students.phd,
                        gpus = outcome.record.gpus.total(),
                        sources = outcome.record.sources.len(),
                        "Entity complete"
                    );
                }
                Ok(None) => {
                    warn!(entity = name, "No usable result, entity failed");
                    summary.failed.push(entity.name.clone());
                }
                Err(e) => {
                    warn!(entity = name, error = %e, "Entity failed");
                    summary.failed.push(entity.name.clone());
                }
            }

            if (i + 1) % checkpoint_every == 0 {
                match self.write_report(entities, mode) {
                    Ok(rows) => info!(rows = rows.len(), "Checkpoint report written"),
                    Err(e) => warn!(error = %e, "Checkpoint report failed"),
                }
            }

            let cooldown = self.cooldown(mode);
            if network_used && i + 1 < total && !cooldown.is_zero() {
                info!(secs = cooldown.as_secs(), "Cooling down");
                tokio::time::sleep(cooldown).await;
            }
        }

        let rows = self.write_report(entities, mode)?;
        log_leaderboard(&rows);
        info!(summary = %summary, "Batch complete");
        Ok(summary)
    }

    /// Re-validate every aggregate record into the validated namespace.
    pub async fn validate_all(&self) -> Result<ValidationSummary> {
        if !self.post_validator.is_enabled() {
            return Err(Error::Config("no validation backend configured".into()).into());
        }

        let records: Vec<(String, ResearchRecord)> = self.cache.entries(AGGREGATE_NAMESPACE)?;
        info!(records = records.len(), "Validating aggregate records");

        let mut summary = ValidationSummary::default();
        for (i, (key, record)) in records.iter().enumerate() {
            let entity = record.entity_name.as_str();
            let outcome = self.post_validator.validate(record).await;
            summary.record(outcome.status);
            if outcome.status != ValidationStatus::Failed {
                self.cache.put_entry(VALIDATED_NAMESPACE, key, &outcome.record)?;
            }
            info!(entity, status = %outcome.status, changes = outcome.changes.len(), "Validated");

            if i + 1 < records.len() && !self.validation_pacing.is_zero() {
                tokio::time::sleep(self.validation_pacing).await;
            }
        }

        info!(summary = %summary, "Validation complete");
        Ok(summary)
    }

    /// Records the report is built from.
    ///
    /// Single-provider runs read that provider's namespace. Ensemble runs read
    /// validated records, falling back to the aggregate, with student counts
    /// raised to the highest any provider cached.
    pub fn report_records(&self, mode: RunMode) -> Result<Vec<ResearchRecord>> {
        if let RunMode::Single(id) = mode {
            let namespace = self.registry.resolve(id).map(|p| p.id()).unwrap_or(id);
            let results: Vec<ProviderResult> = self.cache.list(namespace.as_str())?;
            return Ok(results
                .into_iter()
                .map(|r| r.record)
                .filter(ResearchRecord::is_usable)
                .collect());
        }

        let mut by_name: HashMap<String, ResearchRecord> = HashMap::new();
        for record in self.cache.list::<ResearchRecord>(AGGREGATE_NAMESPACE)? {
            by_name.insert(record.entity_name.clone(), record);
        }
        for record in self.cache.list::<ResearchRecord>(VALIDATED_NAMESPACE)? {
            by_name.insert(record.entity_name.clone(), record);
        }

        let mut records: Vec<ResearchRecord> = by_name.into_values().collect();
        for record in &mut records {
            self.raise_student_counts(record);
        }
        records.sort_by(|a, b| a.entity_name.cmp(&b.entity_name));
        Ok(records)
    }

    fn raise_student_counts(&self, record: &mut ResearchRecord) {
        let entity = record.entity_name.clone();
        let mut others: Vec<ResearchRecord> = [ProviderId::OpenAi, ProviderId::Claude, ProviderId::Gemini]
            .into_iter()
            .filter_map(|id| self.cache.get::<ProviderResult>(id.as_str(), &entity).ok().flatten())
            .map(|r| r.record)
            .collect();
        if let Ok(Some(aggregate)) = self.cache.get::<ResearchRecord>(AGGREGATE_NAMESPACE, &entity) {
            others.push(aggregate);
        }

        for other in others {
            record.students.undergrad = record.students.undergrad.max(other.students.undergrad);
            record.students.masters = record.students.masters.max(other.students.masters);
            record.students.phd = record.students.phd.max(other.students.phd);
        }
    }

    /// Build the ranked rows from the cache without writing them.
    pub fn build_report(&self, entities: &[Entity], mode: RunMode) -> Result<Vec<ReportRow>> {
        let urls: HashMap<String, String> = entities
            .iter()
            .map(|e| (e.name.clone(), e.url.clone()))
            .collect();
        let records = self.report_records(mode)?;
        Ok(build_rows(records, &urls, &self.prices, &self.config.metrics))
    }

    /// Build the report and write it to the configured path.
    pub fn write_report(&self, entities: &[Entity], mode: RunMode) -> Result<Vec<ReportRow>> {
        let rows = self.build_report(entities, mode)?;
        write_report(&rows, &self.config.paths.report_path())?;
        Ok(rows)
    }
}
