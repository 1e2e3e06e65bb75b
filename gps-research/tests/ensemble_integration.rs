//! Ensemble aggregation against scripted providers and a canned merge backend.

mod common;

use std::sync::Arc;

use common::{offline_validator, record, CannedBackend, ScriptedProvider};
use gps_common::config::Config;
use gps_research::{
    EnsembleAggregator, LlmBackend, MergeMethod, PromptContext, ProviderId, ProviderRegistry,
    ResearchProvider, ResearchRecord, ResultCache, AGGREGATE_NAMESPACE,
};

const ENTITY: &str = "Test University";

/// A merge reply that loses the undergrad count and the GPUs.
const LOSSY_MERGE: &str = r#"```json
{
  "university_name": "Test University",
  "sources": [{"url": "https://merged.example.edu/cds", "data_found": "enrollment"}],
  "student_data": {"undergrad_cs_count": 0, "grad_cs_count": 50, "phd_cs_count": -1, "year": "Fall 2024"},
  "gpu_resources": {"h100_pcie_count": 0},
  "compute_credits": {"total_annual_value_usd": 0, "description": "None"},
  "analysis_notes": "Merged by consensus"
}
```"#;

struct Fixture {
    openai: Arc<ScriptedProvider>,
    claude: Arc<ScriptedProvider>,
    gemini: Arc<ScriptedProvider>,
    cache: Arc<ResultCache>,
    _dir: tempfile::TempDir,
}

impl Fixture {
    fn new(openai: ScriptedProvider, claude: ScriptedProvider, gemini: ScriptedProvider) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            openai: Arc::new(openai),
            claude: Arc::new(claude),
            gemini: Arc::new(gemini),
            cache: Arc::new(ResultCache::new(dir.path())),
            _dir: dir,
        }
    }

    fn aggregator(&self, merger: Option<Arc<CannedBackend>>) -> EnsembleAggregator {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::clone(&self.openai) as Arc<dyn ResearchProvider>);
        registry.register(Arc::clone(&self.claude) as Arc<dyn ResearchProvider>);
        registry.register(Arc::clone(&self.gemini) as Arc<dyn ResearchProvider>);

        EnsembleAggregator::new(
            Arc::new(registry),
            Arc::clone(&self.cache),
            merger.map(|m| m as Arc<dyn LlmBackend>),
            Config::default().providers.merge,
            offline_validator(),
        )
    }

    fn provider_calls(&self) -> usize {
        self.openai.calls() + self.claude.calls() + self.gemini.calls()
    }
}

fn disagreeing() -> Fixture {
    Fixture::new(
        ScriptedProvider::new(ProviderId::OpenAi).with(record(ENTITY, 500, 0, 0)),
        ScriptedProvider::new(ProviderId::Claude).with(record(ENTITY, 0, 50, 16)),
        ScriptedProvider::new(ProviderId::Gemini),
    )
}

#[tokio::test]
async fn test_merge_cannot_lower_maximum() {
    let fixture = disagreeing();
    let merger = CannedBackend::ok(LOSSY_MERGE);
    let aggregated = fixture
        .aggregator(Some(Arc::clone(&merger)))
        .aggregate(ENTITY, &PromptContext::default())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(aggregated.method, MergeMethod::Llm);
    assert_eq!(aggregated.providers, vec![ProviderId::OpenAi, ProviderId::Claude]);
    assert!(aggregated.network_used);

    let merged = &aggregated.record;
    assert_eq!(merged.students.undergrad, 500);
    assert_eq!(merged.students.masters, 50);
    assert_eq!(merged.gpus.h100_pcie_count, 16);
    assert_eq!(merged.notes, "Merged by consensus");
    assert_eq!(merged.unknown_fields, vec!["student_data.phd_cs_count"]);

    let urls: Vec<&str> = merged.sources.iter().map(|s| s.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://merged.example.edu/cds",
            "https://test-university.example.edu/hpc"
        ]
    );
    assert_eq!(merger.calls(), 1);
    assert!(fixture.cache.contains(AGGREGATE_NAMESPACE, ENTITY));
}

#[tokio::test]
async fn test_provider_results_cached_per_namespace() {
    let fixture = disagreeing();
    fixture
        .aggregator(Some(CannedBackend::ok(LOSSY_MERGE)))
        .aggregate(ENTITY, &PromptContext::default())
        .await
        .unwrap();

    assert!(fixture.cache.contains("openai", ENTITY));
    assert!(fixture.cache.contains("claude", ENTITY));
    assert!(!fixture.cache.contains("gemini", ENTITY));
    // Gemini failed once and is not retried inside the same query
    assert_eq!(fixture.gemini.calls(), 1);
}

#[tokio::test]
async fn test_aggregate_cache_hit_makes_no_calls() {
    let fixture = disagreeing();
    let merger = CannedBackend::ok(LOSSY_MERGE);
    let aggregator = fixture.aggregator(Some(Arc::clone(&merger)));
    let prompts = PromptContext::default();

    let first = aggregator.aggregate(ENTITY, &prompts).await.unwrap().unwrap();
    let calls = fixture.provider_calls();

    let second = aggregator.aggregate(ENTITY, &prompts).await.unwrap().unwrap();
    assert_eq!(second.method, MergeMethod::Cached);
    assert!(!second.network_used);
    assert_eq!(second.record, first.record);
    assert_eq!(fixture.provider_calls(), calls);
    assert_eq!(merger.calls(), 1);
}

#[tokio::test]
async fn test_all_providers_fail() {
    let fixture = Fixture::new(
        ScriptedProvider::new(ProviderId::OpenAi),
        ScriptedProvider::new(ProviderId::Claude),
        ScriptedProvider::new(ProviderId::Gemini),
    );
    let merger = CannedBackend::ok(LOSSY_MERGE);
    let aggregated = fixture
        .aggregator(Some(Arc::clone(&merger)))
        .aggregate(ENTITY, &PromptContext::default())
        .await
        .unwrap();

    assert!(aggregated.is_none());
    assert_eq!(merger.calls(), 0);
    assert!(!fixture.cache.contains(AGGREGATE_NAMESPACE, ENTITY));
}

#[tokio::test]
async fn test_merge_failure_keeps_best_single_unpersisted() {
    let fixture = disagreeing();
    let merger = CannedBackend::failing(500);
    let aggregated = fixture
        .aggregator(Some(Arc::clone(&merger)))
        .aggregate(ENTITY, &PromptContext::default())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(aggregated.method, MergeMethod::BestSingle);
    // Claude's record has more positive fields; the maximum still applies
    assert_eq!(aggregated.record.students.undergrad, 500);
    assert_eq!(aggregated.record.gpus.h100_pcie_count, 16);
    assert!(aggregated.record.notes.starts_with("Ensemble result from 2 models"));
    assert!(!fixture.cache.contains(AGGREGATE_NAMESPACE, ENTITY));
}

#[tokio::test]
async fn test_unparsable_merge_is_persisted() {
    let fixture = disagreeing();
    let aggregated = fixture
        .aggregator(Some(CannedBackend::ok("I could not reconcile these results.")))
        .aggregate(ENTITY, &PromptContext::default())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(aggregated.method, MergeMethod::BestSingle);
    let cached: ResearchRecord = fixture
        .cache
        .get(AGGREGATE_NAMESPACE, ENTITY)
        .unwrap()
        .unwrap();
    assert_eq!(cached, aggregated.record);
}
