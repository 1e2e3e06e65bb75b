//! Configuration management for the research pipeline.
//!
//! The pipeline reads a single configuration file at `~/.gps/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! ## LLM API Keys (→ secrets.llm.*)
//! - `OPENAI_API_KEY` → secrets.llm.openai
//! - `ANTHROPIC_API_KEY` → secrets.llm.anthropic
//! - `GEMINI_API_KEY` / `GOOGLE_API_KEY` → secrets.llm.google
//!
//! ## Runtime
//! - `GPS_LOG_LEVEL` → observability.log_level
//! - `GPS_LOG_FORMAT` → observability.log_format
//! - `GPS_DATA_DIR` → paths.data_dir
//! - `GPS_CACHE_DIR` → paths.cache_dir

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".gps"),
        |dirs| dirs.home_dir().join(".gps"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Secrets Configuration
// ============================================================================

/// Grouped secrets configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecretsConfig {
    /// LLM provider API keys
    #[serde(default)]
    pub llm: LlmSecretsConfig,
}

/// LLM provider API keys.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmSecretsConfig {
    #[serde(default)]
    pub openai: Option<String>,
    #[serde(default)]
    pub anthropic: Option<String>,
    #[serde(default)]
    pub google: Option<String>,
}

impl LlmSecretsConfig {
    /// Look up the key for a backend by its config key.
    pub fn key_for(&self, backend: &str) -> Option<&str> {
        let key = match backend {
            "openai" => self.openai.as_deref(),
            "anthropic" | "claude" => self.anthropic.as_deref(),
            "gemini" | "google" => self.google.as_deref(),
            _ => None,
        };
        key.filter(|k| !k.trim().is_empty())
    }
}

// ============================================================================
// Backend Configuration
// ============================================================================

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-5.2";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-opus-4-5";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_VALIDATION_MODEL: &str = "gemini-2.0-flash";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Backend keys accepted by `providers.merge.backend` and `providers.validation.backend`.
pub const KNOWN_BACKENDS: &[&str] = &["openai", "anthropic", "gemini"];

/// Per-backend connection settings. Unset fields fall back to the backend's built-in default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Model identifier override
    #[serde(default)]
    pub model: Option<String>,

    /// API base URL override (useful for proxies and tests)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model: None,
            base_url: None,
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

fn default_backend_timeout_secs() -> u64 {
    600
}

/// Selection of the backend used for a secondary LLM pass (merge or validation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageBackendConfig {
    /// Backend key: "openai", "anthropic" or "gemini"
    pub backend: String,

    /// Model used for this stage
    pub model: String,

    /// Whether search tooling is enabled for this stage
    #[serde(default)]
    pub web_search: bool,

    /// Sampling temperature, when the backend supports it
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Output token ceiling
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

fn default_merge_stage() -> StageBackendConfig {
    StageBackendConfig {
        backend: "gemini".into(),
        model: DEFAULT_GEMINI_MODEL.into(),
        web_search: true,
        temperature: None,
        max_output_tokens: None,
    }
}

fn default_validation_stage() -> StageBackendConfig {
    StageBackendConfig {
        backend: "gemini".into(),
        model: DEFAULT_VALIDATION_MODEL.into(),
        web_search: false,
        temperature: Some(0.1),
        max_output_tokens: Some(4096),
    }
}

/// LLM backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: BackendConfig,

    #[serde(default)]
    pub anthropic: BackendConfig,

    #[serde(default)]
    pub gemini: BackendConfig,

    /// Backend that reconciles the ensemble results
    #[serde(default = "default_merge_stage")]
    pub merge: StageBackendConfig,

    /// Backend that filters shared/national resources
    #[serde(default = "default_validation_stage")]
    pub validation: StageBackendConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            openai: BackendConfig::default(),
            anthropic: BackendConfig::default(),
            gemini: BackendConfig::default(),
            merge: default_merge_stage(),
            validation: default_validation_stage(),
        }
    }
}

impl ProvidersConfig {
    pub fn openai_model(&self) -> &str {
        self.openai.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL)
    }

    pub fn anthropic_model(&self) -> &str {
        self.anthropic
            .model
            .as_deref()
            .unwrap_or(DEFAULT_ANTHROPIC_MODEL)
    }

    pub fn gemini_model(&self) -> &str {
        self.gemini.model.as_deref().unwrap_or(DEFAULT_GEMINI_MODEL)
    }

    /// Connection settings and default base URL for a backend key.
    pub fn backend(&self, key: &str) -> Option<(&BackendConfig, &'static str)> {
        match key {
            "openai" => Some((&self.openai, DEFAULT_OPENAI_BASE_URL)),
            "anthropic" | "claude" => Some((&self.anthropic, DEFAULT_ANTHROPIC_BASE_URL)),
            "gemini" | "google" => Some((&self.gemini, DEFAULT_GEMINI_BASE_URL)),
            _ => None,
        }
    }
}

// ============================================================================
// Research Configuration
// ============================================================================

/// Retry and pacing settings for the research batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Maximum attempts per backend call (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff in seconds; doubles on each retry
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: u64,

    /// Upper bound on a single backoff in seconds
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Pause between entities after network work
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Pause between entities in Gemini-only mode
    #[serde(default = "default_gemini_cooldown_secs")]
    pub gemini_cooldown_secs: u64,

    /// Rewrite the report every N processed entities
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            cooldown_secs: default_cooldown_secs(),
            gemini_cooldown_secs: default_gemini_cooldown_secs(),
            checkpoint_every: default_checkpoint_every(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_backoff_secs() -> u64 {
    10
}

fn default_max_backoff_secs() -> u64 {
    300
}

fn default_cooldown_secs() -> u64 {
    5
}

fn default_gemini_cooldown_secs() -> u64 {
    60
}

fn default_checkpoint_every() -> usize {
    5
}

// ============================================================================
// Source Validator Configuration
// ============================================================================

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Citation URL checking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout of the plain HTTP tier
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Timeout passed to curl via `--max-time`
    #[serde(default = "default_cli_timeout_secs")]
    pub cli_timeout_secs: u64,

    /// Timeout used when checking a manual override URL
    #[serde(default = "default_override_timeout_secs")]
    pub override_timeout_secs: u64,

    /// Timeout of the headless browser tier
    #[serde(default = "default_browser_timeout_secs")]
    pub browser_timeout_secs: u64,

    #[serde(default = "default_curl_path")]
    pub curl_path: String,

    /// Disable to skip the headless browser tier entirely
    #[serde(default = "default_true")]
    pub browser_enabled: bool,

    /// JSON file mapping entity name to a pre-vetted URL
    #[serde(default)]
    pub overrides_file: Option<PathBuf>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            http_timeout_secs: default_http_timeout_secs(),
            cli_timeout_secs: default_cli_timeout_secs(),
            override_timeout_secs: default_override_timeout_secs(),
            browser_timeout_secs: default_browser_timeout_secs(),
            curl_path: default_curl_path(),
            browser_enabled: true,
            overrides_file: None,
        }
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.into()
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_cli_timeout_secs() -> u64 {
    10
}

fn default_override_timeout_secs() -> u64 {
    5
}

fn default_browser_timeout_secs() -> u64 {
    15
}

fn default_curl_path() -> String {
    "curl".into()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Paths Configuration
// ============================================================================

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Entity list; relative paths resolve against `data_dir`
    #[serde(default = "default_universities_file")]
    pub universities_file: PathBuf,

    #[serde(default = "default_gpu_prices_file")]
    pub gpu_prices_file: PathBuf,

    /// Cache root; defaults to `<data_dir>/cache`
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_report_file")]
    pub report_file: PathBuf,

    /// Research prompt template with a `{{UNIVERSITY_NAME}}` placeholder
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,

    /// Post-validation instructions
    #[serde(default)]
    pub validation_prompt_file: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            universities_file: default_universities_file(),
            gpu_prices_file: default_gpu_prices_file(),
            cache_dir: None,
            report_file: default_report_file(),
            prompt_file: None,
            validation_prompt_file: None,
        }
    }
}

impl PathsConfig {
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    pub fn universities_path(&self) -> PathBuf {
        self.resolve(&self.universities_file)
    }

    pub fn gpu_prices_path(&self) -> PathBuf {
        self.resolve(&self.gpu_prices_file)
    }

    pub fn report_path(&self) -> PathBuf {
        self.resolve(&self.report_file)
    }

    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("cache"))
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_universities_file() -> PathBuf {
    PathBuf::from("universities.csv")
}

fn default_gpu_prices_file() -> PathBuf {
    PathBuf::from("gpu_prices.csv")
}

fn default_report_file() -> PathBuf {
    PathBuf::from("gpu_per_student.csv")
}

// ============================================================================
// Metrics Configuration
// ============================================================================

/// Student weighting and GPU valuation constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_undergrad_weight")]
    pub undergrad_weight: f64,

    #[serde(default = "default_masters_weight")]
    pub masters_weight: f64,

    #[serde(default = "default_phd_weight")]
    pub phd_weight: f64,

    /// GPU model whose price normalizes the total value
    #[serde(default = "default_reference_gpu")]
    pub reference_gpu: String,

    /// Dollars of GPU value per dollar of compute credit
    #[serde(default = "default_credit_parity")]
    pub credit_parity: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            undergrad_weight: default_undergrad_weight(),
            masters_weight: default_masters_weight(),
            phd_weight: default_phd_weight(),
            reference_gpu: default_reference_gpu(),
            credit_parity: default_credit_parity(),
        }
    }
}

fn default_undergrad_weight() -> f64 {
    0.45
}

fn default_masters_weight() -> f64 {
    0.7
}

fn default_phd_weight() -> f64 {
    0.9
}

fn default_reference_gpu() -> String {
    "h100_pcie".into()
}

fn default_credit_parity() -> f64 {
    1.0
}

// ============================================================================
// Observability Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration, built once at start-up and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub research: ResearchConfig,

    #[serde(default)]
    pub validator: ValidatorConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration (explicit path or default) with environment overrides applied.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.secrets.llm.openai = Some(key);
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            self.secrets.llm.anthropic = Some(key);
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY").or_else(|_| std::env::var("GOOGLE_API_KEY")) {
            self.secrets.llm.google = Some(key);
        }

        if let Ok(level) = std::env::var("GPS_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("GPS_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Ok(dir) = std::env::var("GPS_DATA_DIR") {
            self.paths.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("GPS_CACHE_DIR") {
            self.paths.cache_dir = Some(PathBuf::from(dir));
        }
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        let path = config_path();
        let dir = config_dir();

        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}
