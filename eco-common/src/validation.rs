//! Configuration validation for Eco Guardian services.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{
    AssessmentConfig, ClassifierConfig, Config, ForecastConfig, ObservabilityConfig, ServerConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

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

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }
        if let Err(e) = self.classifier.validate() {
            errors.push(e);
        }
        if let Err(e) = self.assessment.validate() {
            errors.push(e);
        }
        if let Err(e) = self.forecast.validate() {
            errors.push(e);
        }
        if let Err(e) = self.server.validate() {
            errors.push(e);
        }

        // Documents cannot be classified without a credential.
        if self.inputs.documents_dir.is_some() && self.classifier.api_key.is_none() {
            errors.push(ValidationError::MissingField {
                field: "classifier.api_key (required when inputs.documents_dir is set)".into(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(invalid(
                "observability.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        Ok(())
    }
}

impl Validate for ClassifierConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "classifier.base_url".into(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "classifier.model".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(invalid("classifier.timeout_secs", "must be greater than 0"));
        }
        if self.max_retries > 10 {
            return Err(invalid("classifier.max_retries", "must be at most 10"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(invalid(
                "classifier.max_concurrent_requests",
                "must be at least 1",
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid("classifier.temperature", "must be within [0, 2]"));
        }
        if self.base_backoff_ms > self.max_backoff_ms {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "classifier.base_backoff_ms ({}) exceeds classifier.max_backoff_ms ({})",
                    self.base_backoff_ms, self.max_backoff_ms
                ),
            });
        }

        Ok(())
    }
}

impl Validate for AssessmentConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.token_budget < 1000 {
            return Err(invalid("assessment.token_budget", "must be at least 1000"));
        }
        if self.chars_per_token == 0 {
            return Err(invalid("assessment.chars_per_token", "must be greater than 0"));
        }
        if self.max_document_bytes == 0 {
            return Err(invalid(
                "assessment.max_document_bytes",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Validate for ForecastConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.min_training_years < 3 {
            return Err(invalid("forecast.min_training_years", "must be at least 3"));
        }
        if !(1..=10).contains(&self.horizon_years) {
            return Err(invalid("forecast.horizon_years", "must be within 1..=10"));
        }
        if !(self.interval_level > 0.0 && self.interval_level < 1.0) {
            return Err(invalid(
                "forecast.interval_level",
                "must be strictly between 0 and 1",
            ));
        }
        if self.average_window == 0 {
            return Err(invalid("forecast.average_window", "must be at least 1"));
        }

        Ok(())
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.enabled && self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "server.port".into(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.observability.log_level = "invalid".into();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "observability.log_level"
        ));
    }

    #[test]
    fn test_min_training_years_floor() {
        let mut config = Config::default();
        config.forecast.min_training_years = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interval_level_bounds() {
        let mut config = Config::default();
        config.forecast.interval_level = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_documents_require_api_key() {
        let mut config = Config::default();
        config.inputs.documents_dir = Some(PathBuf::from("/tmp/docs"));
        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingField { .. })
        ));

        config.classifier.api_key = Some("sk-test".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.classifier.timeout_secs = 0;
        config.server.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::Multiple(ref errors)) if errors.len() == 2
        ));
    }

    #[test]
    fn test_backoff_conflict() {
        let mut config = Config::default();
        config.classifier.base_backoff_ms = 20_000;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::Conflict { .. })
        ));
    }
}
