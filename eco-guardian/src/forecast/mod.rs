//! State-level deforestation forecasting.
//!
//! # Flow
//!
//! ```text
//! MunicipalSeries (one state)
//!        │ train (blocking pool)
//!        ▼
//! StateForecastModel ──► ModelRegistry (versioned, atomic swap)
//!        │ project
//!        ▼
//! per-municipality predictions ──► weighted harmonic mean ──► StateForecast
//! ```

mod aggregate;
mod engine;
mod loader;
mod model;
mod registry;
mod series;

pub use aggregate::{
    aggregate_year, weighted_harmonic_mean, AggregatedValue, AggregationError, MunicipalForecast,
};
pub use engine::{project, train, ForecastEngine, ForecastRun};
pub use loader::{load_series_csv, read_series, LoadReport, SeriesLoadError};
pub use model::{fit_municipality, HoldoutErrors, MunicipalModel, Prediction, TrendFit, TrendKind};
pub use registry::ModelRegistry;
pub use series::{MunicipalSeries, Observation, SeriesError};

use chrono::{DateTime, Utc};
use eco_common::config::AreaWeighting;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::regions::Uf;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("state {state}: no municipality has {required} years of history (longest has {longest})")]
    InsufficientData {
        state: Uf,
        required: usize,
        longest: usize,
    },

    #[error("invalid series: {0}")]
    InvalidSeries(String),

    #[error("forecast cancelled")]
    Cancelled,

    #[error("model error: {0}")]
    Model(String),
}

impl ForecastError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => "forecast.insufficient_data",
            Self::InvalidSeries(_) => "forecast.invalid_series",
            Self::Cancelled => "forecast.cancelled",
            Self::Model(_) => "forecast.model",
        }
    }
}

impl From<SeriesError> for ForecastError {
    fn from(e: SeriesError) -> Self {
        Self::InvalidSeries(e.to_string())
    }
}

// ============================================================================
// Model
// ============================================================================

/// First and last year of the training data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingWindow {
    pub first_year: i32,
    pub last_year: i32,
}

/// Trained parameters of a state model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub municipalities: Vec<MunicipalModel>,
    pub weighting: AreaWeighting,
    pub interval_level: f64,
    /// Municipalities left out of training, with the reason
    pub skipped: Vec<SkippedMunicipality>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMunicipality {
    pub municipality: String,
    pub reason: String,
}

/// One state's trained model. Replaced wholesale on retraining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateForecastModel {
    pub state: Uf,
    /// Assigned by the registry; 0 until installed
    pub version: u64,
    pub window: TrainingWindow,
    pub trained_at: DateTime<Utc>,
    pub params: ModelParams,
}

impl StateForecastModel {
    /// Parameters as an opaque blob for storage.
    pub fn params_blob(&self) -> Result<String, ForecastError> {
        serde_json::to_string(&self.params).map_err(|e| ForecastError::Model(e.to_string()))
    }

    /// Rebuild a stored model.
    pub fn from_blob(
        state: Uf,
        version: u64,
        window: TrainingWindow,
        trained_at: DateTime<Utc>,
        blob: &str,
    ) -> Result<Self, ForecastError> {
        let params = serde_json::from_str(blob)
            .map_err(|e| ForecastError::Model(format!("corrupt parameters for {state}: {e}")))?;
        Ok(Self {
            state,
            version,
            window,
            trained_at,
            params,
        })
    }
}

// ============================================================================
// Forecast output
// ============================================================================

/// Projected deforestation for one year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub state: Uf,
    pub year: i32,
    /// Hectares converted
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    pub contributing: usize,
}

/// A projected year that could not be aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastGap {
    pub year: i32,
    pub kind: String,
    pub reason: String,
}

impl From<&AggregationError> for ForecastGap {
    fn from(e: &AggregationError) -> Self {
        let AggregationError::NoWeights { year } = e;
        Self {
            year: *year,
            kind: e.kind().to_string(),
            reason: e.to_string(),
        }
    }
}

/// Remaining forest and farm area after a projected year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandUsePoint {
    pub year: i32,
    /// Summed conversion of municipalities with land-use data
    pub conversion: f64,
    pub forest_area: f64,
    pub farm_area: f64,
}

/// Forecast series of one state.
///
/// `points` and `gaps` together cover every horizon year exactly once;
/// point years are strictly increasing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateForecast {
    pub state: Uf,
    pub model_version: u64,
    pub window: TrainingWindow,
    pub points: Vec<ForecastPoint>,
    #[serde(default)]
    pub gaps: Vec<ForecastGap>,
    #[serde(default)]
    pub land_use: Vec<LandUsePoint>,
    #[serde(default)]
    pub skipped: Vec<SkippedMunicipality>,
    pub created_at: DateTime<Utc>,
}
