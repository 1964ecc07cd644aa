//! Trend-only municipal sub-models.
//!
//! Each municipality fits either a linear trend or a flat level over its
//! observed years. Years are used as the regressor directly, so missing
//! years need no imputation.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::series::MunicipalSeries;

/// Shape of a municipal trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendKind {
    Linear,
    Flat,
}

/// Least-squares fit over (year, area) pairs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendFit {
    pub kind: TrendKind,
    /// Fitted value at `mean_year`
    pub level: f64,
    /// Change per year; zero for flat fits
    pub slope: f64,
    pub mean_year: f64,
    /// Sum of squared year deviations
    pub sxx: f64,
    /// Residual standard deviation
    pub sigma: f64,
    pub n: usize,
}

/// Point forecast with a prediction interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub estimate: f64,
    pub lower: f64,
    pub upper: f64,
}

impl TrendFit {
    /// Fit `kind` to the points. Needs more points than parameters.
    pub fn fit(kind: TrendKind, points: &[(f64, f64)]) -> Option<Self> {
        let n = points.len();
        let params = match kind {
            TrendKind::Linear => 2,
            TrendKind::Flat => 1,
        };
        if n <= params {
            return None;
        }

        let nf = n as f64;
        let mean_year = points.iter().map(|(x, _)| x).sum::<f64>() / nf;
        let mean_area = points.iter().map(|(_, y)| y).sum::<f64>() / nf;
        let sxx: f64 = points.iter().map(|(x, _)| (x - mean_year).powi(2)).sum();

        let slope = match kind {
            TrendKind::Linear if sxx > 0.0 => {
                let sxy: f64 = points
                    .iter()
                    .map(|(x, y)| (x - mean_year) * (y - mean_area))
                    .sum();
                sxy / sxx
            }
            TrendKind::Linear => return None,
            TrendKind::Flat => 0.0,
        };

        let sse: f64 = points
            .iter()
            .map(|(x, y)| {
                let fitted = mean_area + slope * (x - mean_year);
                (y - fitted).powi(2)
            })
            .sum();
        let sigma = (sse / (n - params) as f64).sqrt();

        Some(Self {
            kind,
            level: mean_area,
            slope,
            mean_year,
            sxx,
            sigma,
            n,
        })
    }

    fn degrees_of_freedom(&self) -> f64 {
        match self.kind {
            TrendKind::Linear => self.n as f64 - 2.0,
            TrendKind::Flat => self.n as f64 - 1.0,
        }
    }

    pub fn point(&self, year: i32) -> f64 {
        self.level + self.slope * (f64::from(year) - self.mean_year)
    }

    /// Forecast `year` with a two-sided interval at `level` (e.g. 0.95).
    pub fn predict(&self, year: i32, level: f64) -> Prediction {
        let estimate = self.point(year);
        let nf = self.n as f64;
        let leverage = match self.kind {
            TrendKind::Linear if self.sxx > 0.0 => {
                1.0 / nf + (f64::from(year) - self.mean_year).powi(2) / self.sxx
            }
            _ => 1.0 / nf,
        };
        let se = self.sigma * (1.0 + leverage).sqrt();
        let half_width = student_quantile(self.degrees_of_freedom(), level) * se;

        Prediction {
            estimate,
            lower: estimate - half_width,
            upper: estimate + half_width,
        }
    }
}

// Two-sided critical value; falls back to the normal 1.96 if the
// distribution cannot be built.
fn student_quantile(df: f64, level: f64) -> f64 {
    let p = 1.0 - (1.0 - level) / 2.0;
    StudentsT::new(0.0, 1.0, df)
        .map(|t| t.inverse_cdf(p))
        .ok()
        .filter(|q| q.is_finite())
        .unwrap_or(1.96)
}

/// Sub-model of one municipality inside a state model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MunicipalModel {
    pub municipality: String,
    pub fit: TrendFit,
    /// Normalized area share used by the aggregation
    pub weight: f64,
    pub first_year: i32,
    pub last_year: i32,
    /// Absolute one-step holdout errors, when selection ran
    pub holdout: Option<HoldoutErrors>,
    /// Land use at `last_year`
    pub forest_area: Option<f64>,
    pub farm_area: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoldoutErrors {
    pub linear: f64,
    pub flat: f64,
}

// Below this many points there is nothing left to validate against.
const MIN_POINTS_FOR_SELECTION: usize = 4;

/// Fit a municipality, choosing linear or flat by one-step holdout.
///
/// With fewer than four points the linear trend is used as is. The flat
/// model wins ties.
pub fn fit_municipality(series: &MunicipalSeries) -> Option<(TrendFit, Option<HoldoutErrors>)> {
    let points: Vec<(f64, f64)> = series
        .observations()
        .iter()
        .map(|o| (f64::from(o.year), o.area))
        .collect();

    if points.len() < MIN_POINTS_FOR_SELECTION {
        return TrendFit::fit(TrendKind::Linear, &points).map(|fit| (fit, None));
    }

    let (train, holdout) = points.split_at(points.len() - 1);
    let (year, actual) = holdout[0];
    let error = |kind| {
        TrendFit::fit(kind, train).map(|fit| (fit.point(year as i32) - actual).abs())
    };
    let errors = HoldoutErrors {
        linear: error(TrendKind::Linear).unwrap_or(f64::MAX),
        flat: error(TrendKind::Flat).unwrap_or(f64::MAX),
    };
    let kind = if errors.linear < errors.flat {
        TrendKind::Linear
    } else {
        TrendKind::Flat
    };

    TrendFit::fit(kind, &points).map(|fit| (fit, Some(errors)))
}
