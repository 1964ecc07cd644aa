//! Eco Common - Shared configuration, validation, and logging for Eco Guardian.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Logging setup and run identifiers
//! - Utility functions used across Eco Guardian services

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    AreaWeighting, AssessmentConfig, ClassifierConfig, Config, ForecastConfig, InputsConfig,
    ObservabilityConfig, ServerConfig, StoreConfig,
};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{AssessmentConfig, ClassifierConfig, Config, ForecastConfig};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
