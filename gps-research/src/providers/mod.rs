//! Research providers: one adapter per LLM backend, plus an offline mock.
//!
//! Each adapter turns an entity name into a normalized, source-validated
//! [`ResearchRecord`]. The [`ProviderRegistry`] decides which adapters are
//! available for a run from the configured credentials.

mod decomposed;
mod mock;
pub mod prompts;
mod reasoning;
mod search;

pub use decomposed::DecomposedProvider;
pub use mock::MockResearchProvider;
pub use prompts::PromptContext;
pub use reasoning::ReasoningProvider;
pub use search::SearchGroundedProvider;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use gps_common::config::Config;

use crate::backend::build_backend;
use crate::cache::ResultCache;
use crate::error::{ResearchError, Result};
use crate::extract::extract_json_object;
use crate::record::{ProviderId, ProviderResult, ResearchRecord};
use crate::retry::RetryPolicy;
use crate::validator::SourceValidator;

// ============================================================================
// Provider Trait
// ============================================================================

/// One backend integration that can research an entity.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    /// Research `entity` and return a normalized, source-validated record.
    async fn query(&self, entity: &str, prompts: &PromptContext) -> Result<ResearchRecord>;
}

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Parse a reply into a record, fill the default provenance note and validate sources.
pub(crate) async fn finish_reply(
    backend: &str,
    text: &str,
    entity: &str,
    default_note: &str,
    validator: &SourceValidator,
) -> Result<ResearchRecord> {
    let value = extract_json_object(text).ok_or_else(|| {
        ResearchError::malformed(backend, "no JSON object found in reply")
    })?;
    let mut record = ResearchRecord::from_reply(&value, entity, today())?;
    if record.notes.is_empty() {
        record.notes = default_note.to_string();
    }
    if !record.unknown_fields.is_empty() {
        debug!(entity, provider = backend, fields = ?record.unknown_fields, "Reply reported unknown values");
    }
    validator.apply(&mut record).await;
    Ok(record)
}

// ============================================================================
// Read-through cache
// ============================================================================

/// A provider result plus whether it was served from cache.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub result: ProviderResult,
    pub from_cache: bool,
}

/// Query through the provider's cache namespace.
///
/// A usable cached entry is returned as is. Otherwise the provider is
/// queried, and queried once more if the first record has no positive
/// student count. Only usable results are persisted.
pub async fn query_cached(
    provider: &dyn ResearchProvider,
    cache: &ResultCache,
    entity: &str,
    prompts: &PromptContext,
) -> Result<Fetched> {
    let id = provider.id();
    if let Some(result) = cache.get_usable::<ProviderResult>(id.as_str(), entity)? {
        debug!(entity, provider = %id, "Loaded provider result from cache");
        return Ok(Fetched {
            result,
            from_cache: true,
        });
    }

    let mut record = provider.query(entity, prompts).await?;
    if !record.is_usable() {
        info!(entity, provider = %id, "No student data returned, retrying once");
        record = provider.query(entity, prompts).await?;
    }

    let result = ProviderResult::new(id, record);
    if result.record.is_usable() {
        cache.put(id.as_str(), entity, &result)?;
    } else {
        warn!(entity, provider = %id, "Result still has no student data, not cached");
    }
    Ok(Fetched {
        result,
        from_cache: false,
    })
}

// ============================================================================
// Provider Registry
// ============================================================================

/// Available providers for one run, keyed by id.
pub struct ProviderRegistry {
    providers: HashMap<ProviderId, Arc<dyn ResearchProvider>>,
    mock_mode: bool,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            mock_mode: false,
        }
    }

    /// Registry holding only the offline mock provider.
    pub fn mock() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(MockResearchProvider::new()));
        registry.mock_mode = true;
        registry
    }

    /// Build every provider that has credentials; fall back to mock mode when none do.
    pub fn from_config(config: &Config, validator: Arc<SourceValidator>) -> Self {
        let mut registry = Self::new();
        let policy = RetryPolicy::from(&config.research);

        let candidates = [
            (ProviderId::OpenAi, "openai", config.providers.openai_model()),
            (ProviderId::Claude, "anthropic", config.providers.anthropic_model()),
            (ProviderId::Gemini, "gemini", config.providers.gemini_model()),
        ];

        for (id, key, model) in candidates {
            let backend = match build_backend(key, model, config) {
                Ok(backend) => backend,
                Err(e) if e.is_auth_missing() => {
                    warn!(provider = %id, "API key not configured, provider skipped for this run");
                    continue;
                }
                Err(e) => {
                    warn!(provider = %id, error = %e, "Provider unavailable");
                    continue;
                }
            };

            let provider: Arc<dyn ResearchProvider> = match id {
                ProviderId::OpenAi => Arc::new(DecomposedProvider::new(
                    backend,
                    Arc::clone(&validator),
                    policy.clone(),
                )),
                ProviderId::Claude => Arc::new(ReasoningProvider::new(
                    backend,
                    Arc::clone(&validator),
                    policy.clone(),
                )),
                _ => Arc::new(SearchGroundedProvider::new(
                    backend,
                    Arc::clone(&validator),
                    policy.clone(),
                )),
            };
            info!(provider = %id, model, "Provider registered");
            registry.register(provider);
        }

        if registry.is_empty() {
            warn!("No provider credentials configured, running in mock mode");
            return Self::mock();
        }
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn ResearchProvider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn get(&self, id: ProviderId) -> Option<Arc<dyn ResearchProvider>> {
        self.providers.get(&id).cloned()
    }

    /// The provider for a single-provider run; in mock mode every id resolves to the mock.
    pub fn resolve(&self, id: ProviderId) -> Option<Arc<dyn ResearchProvider>> {
        if self.mock_mode {
            return self.get(ProviderId::Mock);
        }
        self.get(id)
    }

    /// Providers in fan-out order.
    pub fn all(&self) -> Vec<Arc<dyn ResearchProvider>> {
        [
            ProviderId::OpenAi,
            ProviderId::Claude,
            ProviderId::Gemini,
            ProviderId::Mock,
        ]
        .into_iter()
        .filter_map(|id| self.get(id))
        .collect()
    }

    pub fn ids(&self) -> Vec<ProviderId> {
        self.all().iter().map(|p| p.id()).collect()
    }

    pub fn is_mock(&self) -> bool {
        self.mock_mode
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed record and counts calls.
    struct CountingProvider {
        id: ProviderId,
        undergrad: Vec<u64>,
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new(id: ProviderId, undergrad: Vec<u64>) -> Self {
            Self {
                id,
                undergrad,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ResearchProvider for CountingProvider {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn query(&self, entity: &str, _prompts: &PromptContext) -> Result<ResearchRecord> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut record = ResearchRecord::empty(entity, today());
            record.students.undergrad = self.undergrad.get(n).copied().unwrap_or(0);
            Ok(record)
        }
    }

    #[tokio::test]
    async fn test_query_cached_retries_unusable_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        let provider = CountingProvider::new(ProviderId::Claude, vec![0, 900]);

        let fetched = query_cached(&provider, &cache, "Test University", &PromptContext::default())
            .await
            .unwrap();
        assert!(!fetched.from_cache);
        assert_eq!(fetched.result.record.students.undergrad, 900);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

        let again = query_cached(&provider, &cache, "Test University", &PromptContext::default())
            .await
            .unwrap();
        assert!(again.from_cache);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unusable_result_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path());
        let provider = CountingProvider::new(ProviderId::Gemini, vec![0, 0]);

        let fetched = query_cached(&provider, &cache, "U", &PromptContext::default())
            .await
            .unwrap();
        assert!(!fetched.result.record.is_usable());
        assert!(!cache.contains("gemini", "U"));
    }

    #[test]
    fn test_registry_without_keys_is_mock() {
        let config = Config::default();
        let validator = Arc::new(
            SourceValidator::from_config(&config.validator).unwrap(),
        );
        let registry = ProviderRegistry::from_config(&config, validator);
        assert!(registry.is_mock());
        assert_eq!(registry.ids(), vec![ProviderId::Mock]);
        assert_eq!(
            registry.resolve(ProviderId::Gemini).map(|p| p.id()),
            Some(ProviderId::Mock)
        );
    }

    #[test]
    fn test_registry_with_one_key() {
        let mut config = Config::default();
        config.secrets.llm.anthropic = Some("sk-ant-test".into());
        let validator = Arc::new(
            SourceValidator::from_config(&config.validator).unwrap(),
        );
        let registry = ProviderRegistry::from_config(&config, validator);
        assert!(!registry.is_mock());
        assert_eq!(registry.ids(), vec![ProviderId::Claude]);
        assert!(registry.resolve(ProviderId::OpenAi).is_none());
    }
}
