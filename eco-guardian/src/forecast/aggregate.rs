//! Weighted harmonic-mean aggregation of municipal forecasts.
//!
//! `state(t) = Σ w_i / Σ (w_i / m_i(t))` over municipalities with a positive
//! weight and a positive forecast at `t`. Excluding a municipality drops it
//! from both sums, which renormalizes the remaining weights.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    #[error("year {year}: every municipal weight is zero or undefined")]
    NoWeights { year: i32 },
}

impl AggregationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoWeights { .. } => "aggregation.no_weights",
        }
    }
}

/// One municipality's forecast for one year.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MunicipalForecast {
    pub weight: f64,
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Aggregated state value for one year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatedValue {
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
    /// Municipalities that entered the estimate
    pub contributing: usize,
    /// Weighted municipalities left out for a non-positive forecast
    pub excluded: usize,
}

fn usable(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Weighted harmonic mean of the pairs whose weight and value are positive.
pub fn weighted_harmonic_mean<I>(pairs: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (weights, inverse) = pairs
        .into_iter()
        .filter(|(w, v)| usable(*w) && usable(*v))
        .fold((0.0, 0.0), |(sw, si), (w, v)| (sw + w, si + w / v));
    (weights > 0.0).then(|| weights / inverse)
}

/// Aggregate one year.
///
/// When every weighted municipality forecasts zero or less the state value
/// is zero. Bounds go through the same mean and are then clamped so that
/// `0 <= lower <= estimate <= upper`.
pub fn aggregate_year(
    year: i32,
    forecasts: &[MunicipalForecast],
) -> Result<AggregatedValue, AggregationError> {
    let weighted: Vec<&MunicipalForecast> =
        forecasts.iter().filter(|f| usable(f.weight)).collect();
    if weighted.is_empty() {
        return Err(AggregationError::NoWeights { year });
    }

    let included: Vec<&MunicipalForecast> = weighted
        .iter()
        .copied()
        .filter(|f| usable(f.estimate))
        .collect();

    let estimate =
        weighted_harmonic_mean(included.iter().map(|f| (f.weight, f.estimate))).unwrap_or(0.0);

    // A zero lower bound anywhere pulls the harmonic mean to zero.
    let lower = if included.is_empty() || included.iter().any(|f| !usable(f.lower)) {
        0.0
    } else {
        weighted_harmonic_mean(included.iter().map(|f| (f.weight, f.lower))).unwrap_or(0.0)
    };

    let upper_source = if included.is_empty() { &weighted } else { &included };
    let upper = weighted_harmonic_mean(upper_source.iter().map(|f| (f.weight, f.upper)))
        .unwrap_or(estimate);

    let estimate = estimate.max(0.0);
    Ok(AggregatedValue {
        estimate,
        lower: lower.clamp(0.0, estimate),
        upper: upper.max(estimate),
        contributing: included.len(),
        excluded: weighted.len() - included.len(),
    })
}
