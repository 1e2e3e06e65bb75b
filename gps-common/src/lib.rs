//! GPS Common - shared configuration, errors, and logging for the
//! GPUs-per-student research pipeline.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error types and context helpers
//! - Logging setup
//! - String helpers for logs and reports

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    BackendConfig, Config, LlmSecretsConfig, MetricsConfig, ObservabilityConfig, PathsConfig,
    ProvidersConfig, ResearchConfig, StageBackendConfig, ValidatorConfig,
};
pub use error::{Error, Result, ResultExt};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result, ResultExt};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
