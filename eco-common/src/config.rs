//! Configuration management for Eco Guardian services.
//!
//! All services share a single configuration file at `~/.ecoguardian/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables (ECO_* prefix)
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `ECO_LOG_LEVEL` → observability.log_level
//! - `ECO_LOG_FORMAT` → observability.log_format
//! - `ECO_CLASSIFIER_URL` → classifier.base_url
//! - `ECO_CLASSIFIER_MODEL` → classifier.model
//! - `OPENAI_API_KEY` → classifier.api_key
//! - `ECO_TOKEN_BUDGET` → assessment.token_budget
//! - `ECO_MIN_TRAINING_YEARS` → forecast.min_training_years
//! - `ECO_DB_PATH` → store.db_path
//! - `ECO_PORT` → server.port

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".ecoguardian"),
        |dirs| dirs.home_dir().join(".ecoguardian"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
///
/// Each section is handed to the engine that owns it at construction time;
/// nothing reads configuration from global state.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Text-classification service
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Policy assessment engine
    #[serde(default)]
    pub assessment: AssessmentConfig,

    /// State forecast engine
    #[serde(default)]
    pub forecast: ForecastConfig,

    /// Result store
    #[serde(default)]
    pub store: StoreConfig,

    /// Read API for the presentation layer
    #[serde(default)]
    pub server: ServerConfig,

    /// Batch inputs
    #[serde(default)]
    pub inputs: InputsConfig,
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

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup (environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("ECO_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("ECO_LOG_FORMAT") {
            self.observability.log_format = format;
        }
        if let Some(url) = lookup("ECO_CLASSIFIER_URL") {
            self.classifier.base_url = url;
        }
        if let Some(model) = lookup("ECO_CLASSIFIER_MODEL") {
            self.classifier.model = model;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.classifier.api_key = Some(key);
        }
        if let Some(budget) = lookup("ECO_TOKEN_BUDGET") {
            if let Ok(b) = budget.parse() {
                self.assessment.token_budget = b;
            }
        }
        if let Some(years) = lookup("ECO_MIN_TRAINING_YEARS") {
            if let Ok(y) = years.parse() {
                self.forecast.min_training_years = y;
            }
        }
        if let Some(path) = lookup("ECO_DB_PATH") {
            self.store.db_path = PathBuf::from(path);
        }
        if let Some(port) = lookup("ECO_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
    }
}

// ============================================================================
// Observability
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets pinned to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============================================================================
// Classifier
// ============================================================================

/// Text-classification service (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Base URL without the `/v1/chat/completions` suffix
    #[serde(default = "default_classifier_url")]
    pub base_url: String,

    /// Bearer credential; usually supplied through `OPENAI_API_KEY`
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Model identifier
    #[serde(default = "default_classifier_model")]
    pub model: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,

    /// Transport retries after the first attempt
    #[serde(default = "default_classifier_retries")]
    pub max_retries: u32,

    /// Base backoff, doubled per retry
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Concurrent requests the service accepts from this client
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Output token cap per response
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: default_classifier_url(),
            api_key: None,
            model: default_classifier_model(),
            timeout_secs: default_classifier_timeout(),
            max_retries: default_classifier_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_concurrent_requests: default_max_concurrent_requests(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

impl ClassifierConfig {
    /// Request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_classifier_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_classifier_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_classifier_timeout() -> u64 {
    120
}

fn default_classifier_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_max_concurrent_requests() -> usize {
    4
}

fn default_temperature() -> f64 {
    0.5
}

fn default_max_output_tokens() -> u32 {
    5000
}

// ============================================================================
// Assessment
// ============================================================================

/// Policy assessment engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentConfig {
    /// Input token budget for document text (about 25-30 pages)
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Characters per token used by the token estimator
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,

    /// Corrective re-requests when criteria are missing
    #[serde(default = "default_corrective_retries")]
    pub corrective_retries: u32,

    /// Re-requests when the response cannot be parsed at all
    #[serde(default = "default_schema_retries")]
    pub schema_retries: u32,

    /// Largest accepted document
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,

    /// Characters of analyzed text kept as a preview
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            chars_per_token: default_chars_per_token(),
            corrective_retries: default_corrective_retries(),
            schema_retries: default_schema_retries(),
            max_document_bytes: default_max_document_bytes(),
            preview_chars: default_preview_chars(),
        }
    }
}

fn default_token_budget() -> usize {
    30_000
}

fn default_chars_per_token() -> usize {
    4
}

fn default_corrective_retries() -> u32 {
    1
}

fn default_schema_retries() -> u32 {
    1
}

fn default_max_document_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_preview_chars() -> usize {
    2500
}

// ============================================================================
// Forecast
// ============================================================================

/// How municipal weights are derived from historical deforested area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AreaWeighting {
    /// Share of the most recent training year
    #[default]
    MostRecentYear,
    /// Share of the mean over the last `average_window` training years
    MultiYearAverage,
}

/// State forecast engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Years projected beyond the training window
    #[serde(default = "default_horizon_years")]
    pub horizon_years: u32,

    /// Minimum observed years for a municipality to be modelled
    #[serde(default = "default_min_training_years")]
    pub min_training_years: usize,

    /// Two-sided prediction interval level
    #[serde(default = "default_interval_level")]
    pub interval_level: f64,

    /// Area-share weighting scheme
    #[serde(default)]
    pub weighting: AreaWeighting,

    /// Window for `multi_year_average` weighting
    #[serde(default = "default_average_window")]
    pub average_window: usize,

    /// Use a registered model instead of retraining when one exists
    #[serde(default)]
    pub reuse_models: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_years: default_horizon_years(),
            min_training_years: default_min_training_years(),
            interval_level: default_interval_level(),
            weighting: AreaWeighting::default(),
            average_window: default_average_window(),
            reuse_models: false,
        }
    }
}

fn default_horizon_years() -> u32 {
    5
}

fn default_min_training_years() -> usize {
    3
}

fn default_interval_level() -> f64 {
    0.95
}

fn default_average_window() -> usize {
    3
}

// ============================================================================
// Store, Server, Inputs
// ============================================================================

/// Result store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    config_dir().join("guardian.db")
}

/// Read API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Serve the read API after the batch finishes
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4480
}

/// Batch inputs. Either may be absent; the matching pipeline is skipped.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InputsConfig {
    /// Directory scanned for `*.pdf` policy documents
    #[serde(default)]
    pub documents_dir: Option<PathBuf>,

    /// CSV with one row per municipality-year
    #[serde(default)]
    pub series_csv: Option<PathBuf>,

    /// Jurisdiction applied to documents that name none
    #[serde(default)]
    pub jurisdiction_hint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.classifier.model, "gpt-4o-mini");
        assert_eq!(config.classifier.timeout(), Duration::from_secs(120));
        assert_eq!(config.assessment.token_budget, 30_000);
        assert_eq!(config.assessment.max_document_bytes, 20 * 1024 * 1024);
        assert_eq!(config.forecast.horizon_years, 5);
        assert_eq!(config.forecast.min_training_years, 3);
        assert_eq!(config.forecast.weighting, AreaWeighting::MostRecentYear);
        assert!(config.server.enabled);
    }

    #[test]
    fn test_partial_file_parses() {
        let config: Config = serde_json::from_str(
            r#"{
                "classifier": { "model": "gpt-4o", "max_retries": 1 },
                "forecast": { "weighting": "multi_year_average" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.classifier.model, "gpt-4o");
        assert_eq!(config.classifier.max_retries, 1);
        assert_eq!(config.classifier.temperature, 0.5);
        assert_eq!(config.forecast.weighting, AreaWeighting::MultiYearAverage);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_log_aliases() {
        let config: Config =
            serde_json::from_str(r#"{ "observability": { "level": "debug", "format": "json" } }"#)
                .unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("ECO_LOG_LEVEL", "debug"),
            ("OPENAI_API_KEY", "sk-test"),
            ("ECO_TOKEN_BUDGET", "8000"),
            ("ECO_MIN_TRAINING_YEARS", "not-a-number"),
            ("ECO_PORT", "9000"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.classifier.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.assessment.token_budget, 8000);
        assert_eq!(config.forecast.min_training_years, 3);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = Config::default();
        config.classifier.api_key = Some("sk-secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "server": { "port": 5000 } }"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.host, "127.0.0.1");
    }
}
