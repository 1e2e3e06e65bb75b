//! Shared fixtures: scripted providers, canned LLM backends and an offline validator.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use gps_common::config::Config;
use gps_research::validator::{FallbackOverrides, FetchError, FetchedPage, PageFetcher};
use gps_research::{
    LlmBackend, LlmRequest, PromptContext, ProviderId, ResearchError, ResearchProvider,
    ResearchRecord, Result, Source, SourceValidator,
};

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
}

pub fn record(entity: &str, undergrad: u64, masters: u64, h100_pcie: u64) -> ResearchRecord {
    let mut record = ResearchRecord::empty(entity, date());
    record.students.undergrad = undergrad;
    record.students.masters = masters;
    record.students.year = "Fall 2024".into();
    record.gpus.h100_pcie_count = h100_pcie;
    record.add_source(Source::new(
        format!(
            "https://{}.example.edu/hpc",
            entity.to_lowercase().replace(' ', "-")
        ),
        "cluster page",
    ));
    record
}

/// Returns a scripted record per entity and counts calls; unknown entities fail.
pub struct ScriptedProvider {
    id: ProviderId,
    records: HashMap<String, ResearchRecord>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            records: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, record: ResearchRecord) -> Self {
        self.records.insert(record.entity_name.clone(), record);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn query(&self, entity: &str, _prompts: &PromptContext) -> Result<ResearchRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.records
            .get(entity)
            .cloned()
            .ok_or_else(|| ResearchError::malformed(self.id.as_str(), "no JSON object found in reply"))
    }
}

/// LLM backend with a fixed reply (or HTTP status failure) and a call counter.
pub struct CannedBackend {
    reply: std::result::Result<String, u16>,
    calls: AtomicUsize,
}

impl CannedBackend {
    pub fn ok(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(status),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmBackend for CannedBackend {
    fn name(&self) -> &str {
        "canned"
    }

    fn model(&self) -> &str {
        "canned-1"
    }

    async fn submit(&self, _request: &LlmRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(status) => Err(ResearchError::from_status("canned", *status, "boom")),
        }
    }
}

/// Every URL answers 200 with a plain page.
struct LivePages(&'static str);

#[async_trait]
impl PageFetcher for LivePages {
    fn tier(&self) -> &'static str {
        self.0
    }

    async fn fetch(&self, _url: &str) -> std::result::Result<FetchedPage, FetchError> {
        Ok(FetchedPage::new(Some(200), "<h1>Research computing</h1>"))
    }
}

/// Validator that accepts every well-formed URL without touching the network.
pub fn offline_validator() -> Arc<SourceValidator> {
    Arc::new(SourceValidator::new(
        Arc::new(LivePages("http")),
        Arc::new(LivePages("curl")),
        None,
        Arc::new(LivePages("curl")),
        FallbackOverrides::empty(),
    ))
}

/// Config rooted in `dir` with no pauses between entities.
pub fn test_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.paths.data_dir = dir.to_path_buf();
    config.research.cooldown_secs = 0;
    config.research.gemini_cooldown_secs = 0;
    config.research.checkpoint_every = 2;
    config
}
