//! Configuration validation.
//!
//! Rejects values that would make a batch run meaningless (zero attempts,
//! non-positive weights, unknown backends) before any network work starts.

use thiserror::Error;

use crate::config::{
    Config, MetricsConfig, ObservabilityConfig, ResearchConfig, StageBackendConfig,
    KNOWN_BACKENDS,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

/// GPU keys the reference price may be taken from.
const REFERENCE_GPU_KEYS: &[&str] = &[
    "h100_sxm", "h100_pcie", "h200", "b100", "b200", "a100_80gb", "a100_40gb", "a40", "a6000",
    "l40s", "v100", "p100", "gh200",
];

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.research.validate() {
            errors.push(e);
        }
        if let Err(e) = self.metrics.validate() {
            errors.push(e);
        }
        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if let Err(e) = validate_stage("providers.merge", &self.providers.merge) {
            errors.push(e);
        }
        if let Err(e) = validate_stage("providers.validation", &self.providers.validation) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

fn validate_stage(field: &str, stage: &StageBackendConfig) -> ValidationResult<()> {
    if !KNOWN_BACKENDS.contains(&stage.backend.as_str()) {
        return Err(ValidationError::InvalidValue {
            field: format!("{field}.backend"),
            reason: format!(
                "'{}' is not one of {}",
                stage.backend,
                KNOWN_BACKENDS.join(", ")
            ),
        });
    }
    if stage.model.trim().is_empty() {
        return Err(ValidationError::MissingField {
            field: format!("{field}.model"),
        });
    }
    Ok(())
}

impl Validate for ResearchConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidValue {
                field: "research.max_attempts".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.max_backoff_secs < self.base_backoff_secs {
            return Err(ValidationError::InvalidValue {
                field: "research.max_backoff_secs".into(),
                reason: "must not be smaller than research.base_backoff_secs".into(),
            });
        }
        if self.checkpoint_every == 0 {
            return Err(ValidationError::InvalidValue {
                field: "research.checkpoint_every".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

impl Validate for MetricsConfig {
    fn validate(&self) -> ValidationResult<()> {
        let weights = [
            ("metrics.undergrad_weight", self.undergrad_weight),
            ("metrics.masters_weight", self.masters_weight),
            ("metrics.phd_weight", self.phd_weight),
        ];
        for (field, value) in weights {
            if !(value.is_finite() && value > 0.0) {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    reason: format!("must be a positive number, got {value}"),
                });
            }
        }
        if !(self.credit_parity.is_finite() && self.credit_parity >= 0.0) {
            return Err(ValidationError::InvalidValue {
                field: "metrics.credit_parity".into(),
                reason: "must be a non-negative number".into(),
            });
        }
        if !REFERENCE_GPU_KEYS.contains(&self.reference_gpu.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "metrics.reference_gpu".into(),
                reason: format!("unknown GPU model '{}'", self.reference_gpu),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        match self.log_format.as_str() {
            "json" | "pretty" => Ok(()),
            other => Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("expected 'json' or 'pretty', got '{other}'"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default();
        config.research.max_attempts = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("research.max_attempts"));
    }

    #[test]
    fn test_unknown_merge_backend_rejected() {
        let mut config = Config::default();
        config.providers.merge.backend = "llama".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.metrics.phd_weight = 0.0;
        config.observability.log_format = "xml".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::Multiple(errors)) if errors.len() == 2
        ));
    }

    #[test]
    fn test_unknown_reference_gpu_rejected() {
        let metrics = MetricsConfig {
            reference_gpu: "rtx_4090".into(),
            ..MetricsConfig::default()
        };
        assert!(metrics.validate().is_err());
    }
}
