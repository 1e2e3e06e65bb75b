//! Canonical research record and its lenient normalization from model replies.
//!
//! Backends return loosely-typed JSON: counts arrive as numbers, strings,
//! floats, `null` or the `-1` "unknown" sentinel. [`ResearchRecord::from_reply`]
//! turns any of that into a record whose counts are non-negative integers,
//! whose GPU keys come from the fixed [`GpuModel`] set, and whose sources are
//! unique by URL.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{ResearchError, Result};

/// Sentinel written into `source_url` fields when no citation survived validation.
pub const NO_VALID_SOURCE: &str = "NO_VALID_SOURCE";

// ============================================================================
// GPU Models
// ============================================================================

/// The fixed set of GPU models the pipeline counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuModel {
    H100Sxm,
    H100Pcie,
    H200,
    Gh200,
    B200,
    B100,
    A100_80gb,
    A100_40gb,
    A40,
    A6000,
    L40s,
    V100,
    P100,
}

impl GpuModel {
    /// Every model, in report column order.
    pub const ALL: [GpuModel; 13] = [
        GpuModel::H100Sxm,
        GpuModel::H100Pcie,
        GpuModel::H200,
        GpuModel::Gh200,
        GpuModel::B200,
        GpuModel::B100,
        GpuModel::A100_80gb,
        GpuModel::A100_40gb,
        GpuModel::A40,
        GpuModel::A6000,
        GpuModel::L40s,
        GpuModel::V100,
        GpuModel::P100,
    ];

    /// Price-table key, e.g. `h100_pcie`.
    pub const fn key(self) -> &'static str {
        match self {
            GpuModel::H100Sxm => "h100_sxm",
            GpuModel::H100Pcie => "h100_pcie",
            GpuModel::H200 => "h200",
            GpuModel::Gh200 => "gh200",
            GpuModel::B200 => "b200",
            GpuModel::B100 => "b100",
            GpuModel::A100_80gb => "a100_80gb",
            GpuModel::A100_40gb => "a100_40gb",
            GpuModel::A40 => "a40",
            GpuModel::A6000 => "a6000",
            GpuModel::L40s => "l40s",
            GpuModel::V100 => "v100",
            GpuModel::P100 => "p100",
        }
    }

    /// JSON field name inside `gpu_resources`, e.g. `h100_pcie_count`.
    pub const fn count_field(self) -> &'static str {
        match self {
            GpuModel::H100Sxm => "h100_sxm_count",
            GpuModel::H100Pcie => "h100_pcie_count",
            GpuModel::H200 => "h200_count",
            GpuModel::Gh200 => "gh200_count",
            GpuModel::B200 => "b200_count",
            GpuModel::B100 => "b100_count",
            GpuModel::A100_80gb => "a100_80gb_count",
            GpuModel::A100_40gb => "a100_40gb_count",
            GpuModel::A40 => "a40_count",
            GpuModel::A6000 => "a6000_count",
            GpuModel::L40s => "l40s_count",
            GpuModel::V100 => "v100_count",
            GpuModel::P100 => "p100_count",
        }
    }

    /// Human-facing column label.
    pub const fn display_name(self) -> &'static str {
        match self {
            GpuModel::H100Sxm => "H100 SXM",
            GpuModel::H100Pcie => "H100 PCIe",
            GpuModel::H200 => "H200",
            GpuModel::Gh200 => "GH200",
            GpuModel::B200 => "B200",
            GpuModel::B100 => "B100",
            GpuModel::A100_80gb => "A100 80GB",
            GpuModel::A100_40gb => "A100 40GB",
            GpuModel::A40 => "A40",
            GpuModel::A6000 => "RTX A6000",
            GpuModel::L40s => "L40S",
            GpuModel::V100 => "V100",
            GpuModel::P100 => "P100",
        }
    }

    /// Resolve a normalized price key such as `h100_pcie` or `rtx_a6000`.
    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        let key = key.strip_prefix("rtx_").unwrap_or(&key);
        Self::ALL.into_iter().find(|m| m.key() == key)
    }
}

impl fmt::Display for GpuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// ============================================================================
// Provider Identity
// ============================================================================

/// Which backend integration produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Claude,
    Gemini,
    Mock,
}

impl ProviderId {
    /// Cache namespace and config key.
    pub const fn as_str(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Claude => "claude",
            ProviderId::Gemini => "gemini",
            ProviderId::Mock => "mock",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "gpt" => Ok(ProviderId::OpenAi),
            "claude" | "anthropic" => Ok(ProviderId::Claude),
            "gemini" | "google" => Ok(ProviderId::Gemini),
            "mock" => Ok(ProviderId::Mock),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

// ============================================================================
// Record Sections
// ============================================================================

/// A cited piece of evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default, alias = "data_found")]
    pub description: String,
}

impl Source {
    pub fn new(url: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            description: description.into(),
        }
    }
}

/// CS enrollment by level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudentCounts {
    #[serde(rename = "undergrad_cs_count", default)]
    pub undergrad: u64,
    #[serde(rename = "grad_cs_count", default)]
    pub masters: u64,
    #[serde(rename = "phd_cs_count", default)]
    pub phd: u64,
    #[serde(default)]
    pub year: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub notes: String,
}

impl StudentCounts {
    pub fn any_positive(&self) -> bool {
        self.undergrad > 0 || self.masters > 0 || self.phd > 0
    }
}

/// Dedicated GPU inventory, one count per model in the fixed set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpuInventory {
    #[serde(default)]
    pub h100_sxm_count: u64,
    #[serde(default)]
    pub h100_pcie_count: u64,
    #[serde(default)]
    pub h200_count: u64,
    #[serde(default)]
    pub gh200_count: u64,
    #[serde(default)]
    pub b200_count: u64,
    #[serde(default)]
    pub b100_count: u64,
    #[serde(default)]
    pub a100_80gb_count: u64,
    #[serde(default)]
    pub a100_40gb_count: u64,
    #[serde(default)]
    pub a40_count: u64,
    #[serde(default)]
    pub a6000_count: u64,
    #[serde(default)]
    pub l40s_count: u64,
    #[serde(default)]
    pub v100_count: u64,
    #[serde(default)]
    pub p100_count: u64,
    #[serde(default)]
    pub other_high_vram_gpus: Vec<Value>,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub notes: String,
}

impl GpuInventory {
    pub fn count(&self, model: GpuModel) -> u64 {
        match model {
            GpuModel::H100Sxm => self.h100_sxm_count,
            GpuModel::H100Pcie => self.h100_pcie_count,
            GpuModel::H200 => self.h200_count,
            GpuModel::Gh200 => self.gh200_count,
            GpuModel::B200 => self.b200_count,
            GpuModel::B100 => self.b100_count,
            GpuModel::A100_80gb => self.a100_80gb_count,
            GpuModel::A100_40gb => self.a100_40gb_count,
            GpuModel::A40 => self.a40_count,
            GpuModel::A6000 => self.a6000_count,
            GpuModel::L40s => self.l40s_count,
            GpuModel::V100 => self.v100_count,
            GpuModel::P100 => self.p100_count,
        }
    }

    pub fn set_count(&mut self, model: GpuModel, value: u64) {
        let slot = match model {
            GpuModel::H100Sxm => &mut self.h100_sxm_count,
            GpuModel::H100Pcie => &mut self.h100_pcie_count,
            GpuModel::H200 => &mut self.h200_count,
            GpuModel::Gh200 => &mut self.gh200_count,
            GpuModel::B200 => &mut self.b200_count,
            GpuModel::B100 => &mut self.b100_count,
            GpuModel::A100_80gb => &mut self.a100_80gb_count,
            GpuModel::A100_40gb => &mut self.a100_40gb_count,
            GpuModel::A40 => &mut self.a40_count,
            GpuModel::A6000 => &mut self.a6000_count,
            GpuModel::L40s => &mut self.l40s_count,
            GpuModel::V100 => &mut self.v100_count,
            GpuModel::P100 => &mut self.p100_count,
        };
        *slot = value;
    }

    /// Non-zero counts in column order.
    pub fn counts(&self) -> impl Iterator<Item = (GpuModel, u64)> + '_ {
        GpuModel::ALL
            .into_iter()
            .map(|m| (m, self.count(m)))
            .filter(|(_, c)| *c > 0)
    }

    pub fn total(&self) -> u64 {
        GpuModel::ALL.into_iter().map(|m| self.count(m)).sum()
    }
}

/// Annualized value of non-owned compute (cloud credits, allocations).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComputeCredits {
    #[serde(default)]
    pub total_annual_value_usd: f64,
    #[serde(default)]
    pub description: String,
}

// ============================================================================
// Research Record
// ============================================================================

/// The canonical unit produced by providers, the aggregator and the post-validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchRecord {
    #[serde(rename = "university_name")]
    pub entity_name: String,

    #[serde(rename = "data_retrieved_date")]
    pub retrieved_date: NaiveDate,

    #[serde(default)]
    pub sources: Vec<Source>,

    #[serde(rename = "student_data", default)]
    pub students: StudentCounts,

    #[serde(rename = "gpu_resources", default)]
    pub gpus: GpuInventory,

    #[serde(default)]
    pub compute_credits: ComputeCredits,

    #[serde(rename = "analysis_notes", default)]
    pub notes: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_notes: Option<String>,

    /// Fields reported with the "unknown" sentinel, as `section.field`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_fields: Vec<String>,
}

impl ResearchRecord {
    /// Empty record for an entity, every count zero.
    pub fn empty(entity: &str, today: NaiveDate) -> Self {
        Self {
            entity_name: entity.to_string(),
            retrieved_date: today,
            sources: Vec::new(),
            students: StudentCounts::default(),
            gpus: GpuInventory::default(),
            compute_credits: ComputeCredits::default(),
            notes: String::new(),
            validation_notes: None,
            unknown_fields: Vec::new(),
        }
    }

    /// Normalize a parsed model reply into a record.
    ///
    /// Missing sections default to zero/empty and the date falls back to
    /// `today`. The record is always named `entity`; a reply's own
    /// `university_name` is ignored. Fails only when `reply` is not an object.
    pub fn from_reply(reply: &Value, entity: &str, today: NaiveDate) -> Result<Self> {
        let obj = reply
            .as_object()
            .ok_or_else(|| ResearchError::malformed("record", "reply is not a JSON object"))?;

        let mut record = Self::empty(entity, today);
        let mut unknown = Vec::new();

        if let Some(date) = obj
            .get("data_retrieved_date")
            .and_then(Value::as_str)
            .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        {
            record.retrieved_date = date;
        }

        if let Some(sources) = obj.get("sources") {
            for source in parse_sources(sources) {
                record.add_source(source);
            }
        }

        let empty = Map::new();
        let students = obj.get("student_data").and_then(Value::as_object).unwrap_or(&empty);
        record.students = StudentCounts {
            undergrad: read_count(students, "undergrad_cs_count", "student_data", &mut unknown),
            masters: read_count(students, "grad_cs_count", "student_data", &mut unknown),
            phd: read_count(students, "phd_cs_count", "student_data", &mut unknown),
            year: read_text(students.get("year")),
            source_url: read_text(students.get("source_url")),
            notes: read_text(students.get("notes")),
        };

        let gpus = obj.get("gpu_resources").and_then(Value::as_object).unwrap_or(&empty);
        for model in GpuModel::ALL {
            let count = read_count(gpus, model.count_field(), "gpu_resources", &mut unknown);
            record.gpus.set_count(model, count);
        }
        // Bare "h100_count" from older prompts counts as PCIe
        if record.gpus.h100_pcie_count == 0 && gpus.contains_key("h100_count") {
            let legacy = read_count(gpus, "h100_count", "gpu_resources", &mut unknown);
            record.gpus.h100_pcie_count = legacy;
        }
        record.gpus.other_high_vram_gpus = gpus
            .get("other_high_vram_gpus")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        record.gpus.source_url = read_text(gpus.get("source_url"));
        record.gpus.notes = read_text(gpus.get("notes"));

        if let Some(credits) = obj.get("compute_credits").and_then(Value::as_object) {
            record.compute_credits = ComputeCredits {
                total_annual_value_usd: read_amount(credits.get("total_annual_value_usd")),
                description: read_text(credits.get("description")),
            };
        }

        record.notes = read_text(obj.get("analysis_notes"));
        record.validation_notes = obj
            .get("validation_notes")
            .map(|v| read_text(Some(v)))
            .filter(|s| !s.is_empty());
        record.unknown_fields = unknown;

        Ok(record)
    }

    /// Append a source unless its URL is already present.
    pub fn add_source(&mut self, source: Source) {
        let url = source.url.trim();
        if url.is_empty() || self.sources.iter().any(|s| s.url == url) {
            return;
        }
        self.sources.push(Source {
            url: url.to_string(),
            description: source.description,
        });
    }

    /// At least one student count is positive.
    pub fn is_usable(&self) -> bool {
        self.students.any_positive()
    }

    /// Number of positive numeric fields, used to pick the best single result.
    pub fn positive_field_count(&self) -> usize {
        let students = [self.students.undergrad, self.students.masters, self.students.phd]
            .into_iter()
            .filter(|c| *c > 0)
            .count();
        let gpus = self.gpus.counts().count();
        let credits = usize::from(self.compute_credits.total_annual_value_usd > 0.0);
        students + gpus + credits
    }

    /// Append to the provenance trail without overwriting it.
    pub fn append_note(&mut self, note: &str) {
        let note = note.trim();
        if note.is_empty() || self.notes.contains(note) {
            return;
        }
        if self.notes.is_empty() {
            self.notes = note.to_string();
        } else {
            self.notes = format!("{} | {}", self.notes, note);
        }
    }
}

/// A record tagged with the provider that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider: ProviderId,
    pub fetched_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: ResearchRecord,
}

impl ProviderResult {
    pub fn new(provider: ProviderId, record: ResearchRecord) -> Self {
        Self {
            provider,
            fetched_at: Utc::now(),
            record,
        }
    }
}

/// Predicate that decides whether a cached snapshot may be reused.
pub trait Usable {
    fn is_usable(&self) -> bool;
}

impl Usable for ResearchRecord {
    fn is_usable(&self) -> bool {
        ResearchRecord::is_usable(self)
    }
}

impl Usable for ProviderResult {
    fn is_usable(&self) -> bool {
        self.record.is_usable()
    }
}

// ============================================================================
// Lenient Field Readers
// ============================================================================

fn parse_sources(value: &Value) -> Vec<Source> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(url) => Some(Source::new(url.clone(), "")),
            Value::Object(obj) => {
                let url = read_text(obj.get("url"));
                let description = obj
                    .get("description")
                    .or_else(|| obj.get("data_found"))
                    .map(|v| read_text(Some(v)))
                    .unwrap_or_default();
                Some(Source::new(url, description))
            }
            _ => None,
        })
        .collect()
}

/// Read a count, flagging negative or unparsable values as unknown.
fn read_count(
    obj: &Map<String, Value>,
    field: &str,
    section: &str,
    unknown: &mut Vec<String>,
) -> u64 {
    let parsed = match obj.get(field) {
        None | Some(Value::Null) => return 0,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_number_text(s),
        Some(Value::Bool(_)) | Some(Value::Array(_)) | Some(Value::Object(_)) => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => v.round() as u64,
        _ => {
            unknown.push(format!("{section}.{field}"));
            0
        }
    }
}

/// Read a dollar amount; negative or unparsable values become zero.
fn read_amount(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => parse_number_text(s),
        _ => None,
    };
    parsed.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(0.0)
}

fn parse_number_text(s: &str) -> Option<f64> {
    let cleaned: String = s
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '~' | '+' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn read_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| read_text(Some(v)))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        _ => String::new(),
    }
}
