//! Training and projection of state forecasts.

use chrono::Utc;
use eco_common::config::{AreaWeighting, ForecastConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aggregate::{aggregate_year, MunicipalForecast};
use super::model::{fit_municipality, MunicipalModel};
use super::registry::ModelRegistry;
use super::series::MunicipalSeries;
use super::{
    ForecastError, ForecastGap, ForecastPoint, LandUsePoint, ModelParams, SkippedMunicipality,
    StateForecast, StateForecastModel, TrainingWindow,
};
use crate::regions::Uf;

/// Result of forecasting one state.
#[derive(Debug, Clone)]
pub struct ForecastRun {
    pub forecast: StateForecast,
    pub model: Arc<StateForecastModel>,
    /// False when a registered model was reused
    pub retrained: bool,
}

/// Produces state forecasts and keeps the registry current.
pub struct ForecastEngine {
    config: ForecastConfig,
    registry: Arc<ModelRegistry>,
}

impl ForecastEngine {
    pub fn new(config: ForecastConfig, registry: Arc<ModelRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Forecast `state` from its municipal series.
    ///
    /// Training runs on the blocking pool. A cancelled run installs nothing.
    pub async fn forecast_state(
        &self,
        state: Uf,
        series: Vec<MunicipalSeries>,
        cancel: &CancellationToken,
    ) -> Result<ForecastRun, ForecastError> {
        if self.config.reuse_models {
            if let Some(model) = self.registry.get(state).await {
                debug!(state = %state, version = model.version, "Reusing registered model");
                return Ok(ForecastRun {
                    forecast: project(&model, self.config.horizon_years),
                    model,
                    retrained: false,
                });
            }
        }

        if cancel.is_cancelled() {
            return Err(ForecastError::Cancelled);
        }

        let config = self.config.clone();
        let training = tokio::task::spawn_blocking(move || train(&config, state, &series));
        let model = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ForecastError::Cancelled),
            joined = training => joined
                .map_err(|e| ForecastError::Model(format!("training task failed: {e}")))??,
        };
        if cancel.is_cancelled() {
            return Err(ForecastError::Cancelled);
        }

        let model = self.registry.install(model).await;
        let forecast = project(&model, self.config.horizon_years);
        info!(
            state = %state,
            version = model.version,
            points = forecast.points.len(),
            gaps = forecast.gaps.len(),
            "State forecast ready"
        );
        Ok(ForecastRun {
            forecast,
            model,
            retrained: true,
        })
    }
}

/// Train a state model from its municipal series.
///
/// Municipalities with fewer than `min_training_years` observations are
/// skipped; when none remain the state has insufficient data.
pub fn train(
    config: &ForecastConfig,
    state: Uf,
    series: &[MunicipalSeries],
) -> Result<StateForecastModel, ForecastError> {
    if let Some(foreign) = series.iter().find(|s| s.state() != state) {
        return Err(ForecastError::InvalidSeries(format!(
            "municipality {} belongs to {}, not {}",
            foreign.municipality(),
            foreign.state(),
            state
        )));
    }

    let required = config.min_training_years;
    let longest = series.iter().map(MunicipalSeries::len).max().unwrap_or(0);
    let mut skipped = Vec::new();
    let mut eligible = Vec::new();
    for s in series {
        if s.len() >= required {
            eligible.push(s);
        } else {
            skipped.push(SkippedMunicipality {
                municipality: s.municipality().to_string(),
                reason: format!("{} years of history, {} required", s.len(), required),
            });
        }
    }
    if eligible.is_empty() {
        return Err(ForecastError::InsufficientData {
            state,
            required,
            longest,
        });
    }

    let window = TrainingWindow {
        first_year: eligible.iter().map(|s| s.first_year()).min().unwrap_or(0),
        last_year: eligible.iter().map(|s| s.last_year()).max().unwrap_or(0),
    };

    let raw_weights: Vec<f64> = eligible
        .iter()
        .map(|s| area_weight(s, window.last_year, config))
        .collect();
    let total: f64 = raw_weights.iter().sum();

    let mut municipalities = Vec::with_capacity(eligible.len());
    for (s, raw) in eligible.iter().zip(raw_weights) {
        let Some((fit, holdout)) = fit_municipality(s) else {
            skipped.push(SkippedMunicipality {
                municipality: s.municipality().to_string(),
                reason: "trend could not be fitted".to_string(),
            });
            continue;
        };
        municipalities.push(MunicipalModel {
            municipality: s.municipality().to_string(),
            fit,
            weight: if total > 0.0 { raw / total } else { 0.0 },
            first_year: s.first_year(),
            last_year: s.last_year(),
            holdout,
            forest_area: s.forest_area(),
            farm_area: s.farm_area(),
        });
    }
    if municipalities.is_empty() {
        return Err(ForecastError::InsufficientData {
            state,
            required,
            longest,
        });
    }
    if total <= 0.0 {
        warn!(state = %state, year = window.last_year, "No deforested area in weighting years");
    }

    Ok(StateForecastModel {
        state,
        version: 0,
        window,
        trained_at: Utc::now(),
        params: ModelParams {
            municipalities,
            weighting: config.weighting,
            interval_level: config.interval_level,
            skipped,
        },
    })
}

// Unnormalized area share of one municipality.
fn area_weight(series: &MunicipalSeries, last_year: i32, config: &ForecastConfig) -> f64 {
    match config.weighting {
        AreaWeighting::MostRecentYear => series.area_in(last_year).unwrap_or(0.0),
        AreaWeighting::MultiYearAverage => {
            let window = config.average_window.max(1) as i32;
            let values: Vec<f64> = (last_year - window + 1..=last_year)
                .filter_map(|year| series.area_in(year))
                .collect();
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        }
    }
}

/// Project `horizon` years beyond the model's training window.
pub fn project(model: &StateForecastModel, horizon: u32) -> StateForecast {
    let params = &model.params;
    let first = model.window.last_year + 1;
    let years = first..first + horizon as i32;

    let mut points = Vec::new();
    let mut gaps = Vec::new();
    let mut land_use = Vec::new();

    let with_land_use: Vec<&MunicipalModel> = params
        .municipalities
        .iter()
        .filter(|m| m.forest_area.is_some())
        .collect();
    let mut forest: f64 = with_land_use.iter().filter_map(|m| m.forest_area).sum();
    let mut farm: f64 = with_land_use.iter().filter_map(|m| m.farm_area).sum();

    for year in years {
        let forecasts: Vec<MunicipalForecast> = params
            .municipalities
            .iter()
            .map(|m| {
                let p = m.fit.predict(year, params.interval_level);
                MunicipalForecast {
                    weight: m.weight,
                    estimate: p.estimate,
                    lower: p.lower,
                    upper: p.upper,
                }
            })
            .collect();

        match aggregate_year(year, &forecasts) {
            Ok(value) => points.push(ForecastPoint {
                state: model.state,
                year,
                estimate: value.estimate,
                lower: value.lower,
                upper: value.upper,
                contributing: value.contributing,
            }),
            Err(e) => {
                warn!(state = %model.state, year, error = %e, "Aggregation gap");
                gaps.push(ForecastGap::from(&e));
            }
        }

        if !with_land_use.is_empty() {
            let conversion: f64 = with_land_use
                .iter()
                .map(|m| m.fit.point(year).max(0.0))
                .sum();
            let remaining = (forest - conversion).max(0.0);
            farm += forest - remaining;
            forest = remaining;
            land_use.push(LandUsePoint {
                year,
                conversion,
                forest_area: forest,
                farm_area: farm,
            });
        }
    }

    StateForecast {
        state: model.state,
        model_version: model.version,
        window: model.window,
        points,
        gaps,
        land_use,
        skipped: params.skipped.clone(),
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::series::Observation;

    fn series(id: &str, state: Uf, values: &[(i32, f64)]) -> MunicipalSeries {
        let obs = values
            .iter()
            .map(|(year, area)| Observation {
                year: *year,
                area: *area,
            })
            .collect();
        MunicipalSeries::new(id, state, obs).unwrap()
    }

    fn ramp(id: &str, state: Uf, start: f64, step: f64) -> MunicipalSeries {
        let values: Vec<(i32, f64)> = (0..6)
            .map(|i| (2015 + i, start + step * f64::from(i)))
            .collect();
        series(id, state, &values)
    }

    #[test]
    fn test_train_and_project_five_points() {
        let config = ForecastConfig::default();
        let input = vec![ramp("a", Uf::Para, 100.0, 10.0), ramp("b", Uf::Para, 50.0, 5.0)];
        let model = train(&config, Uf::Para, &input).unwrap();
        assert_eq!(model.window.last_year, 2020);

        let forecast = project(&model, 5);
        let years: Vec<i32> = forecast.points.iter().map(|p| p.year).collect();
        assert_eq!(years, vec![2021, 2022, 2023, 2024, 2025]);
        assert!(forecast.gaps.is_empty());
        for p in &forecast.points {
            assert!(p.estimate >= 0.0 && p.lower <= p.estimate && p.estimate <= p.upper);
        }
    }

    #[test]
    fn test_declining_trend_clamped_to_zero() {
        let config = ForecastConfig::default();
        let input = vec![series(
            "a",
            Uf::Acre,
            &[(2018, 30.0), (2019, 20.0), (2020, 10.0)],
        )];
        let model = train(&config, Uf::Acre, &input).unwrap();
        let forecast = project(&model, 5);
        assert_eq!(forecast.points.len(), 5);
        assert!(forecast.points.iter().all(|p| p.estimate == 0.0));
    }

    #[test]
    fn test_insufficient_history() {
        let config = ForecastConfig::default();
        let input = vec![series("a", Uf::Amapa, &[(2019, 1.0), (2020, 2.0)])];
        let err = train(&config, Uf::Amapa, &input).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData {
                required: 3,
                longest: 2,
                ..
            }
        ));
        assert_eq!(err.kind(), "forecast.insufficient_data");
    }

    #[test]
    fn test_short_municipalities_skipped() {
        let config = ForecastConfig::default();
        let input = vec![
            ramp("long", Uf::Para, 10.0, 1.0),
            series("short", Uf::Para, &[(2019, 1.0), (2020, 2.0)]),
        ];
        let model = train(&config, Uf::Para, &input).unwrap();
        assert_eq!(model.params.municipalities.len(), 1);
        assert_eq!(model.params.skipped[0].municipality, "short");
        assert!((model.params.municipalities[0].weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_foreign_series_rejected() {
        let config = ForecastConfig::default();
        let input = vec![ramp("a", Uf::Bahia, 1.0, 1.0)];
        assert!(matches!(
            train(&config, Uf::Para, &input),
            Err(ForecastError::InvalidSeries(_))
        ));
    }

    #[test]
    fn test_zero_weights_become_gaps() {
        let config = ForecastConfig::default();
        let input = vec![series("a", Uf::Para, &[(2018, 5.0), (2019, 3.0), (2020, 0.0)])];
        let model = train(&config, Uf::Para, &input).unwrap();
        let forecast = project(&model, 5);
        assert!(forecast.points.is_empty());
        assert_eq!(forecast.gaps.len(), 5);
        assert_eq!(forecast.gaps[0].kind, "aggregation.no_weights");
    }

    #[test]
    fn test_multi_year_weighting() {
        let config = ForecastConfig {
            weighting: AreaWeighting::MultiYearAverage,
            average_window: 3,
            ..ForecastConfig::default()
        };
        let input = vec![
            series("a", Uf::Para, &[(2018, 30.0), (2019, 30.0), (2020, 0.0)]),
            series("b", Uf::Para, &[(2018, 10.0), (2019, 10.0), (2020, 10.0)]),
        ];
        let model = train(&config, Uf::Para, &input).unwrap();
        let weights: Vec<f64> = model.params.municipalities.iter().map(|m| m.weight).collect();
        assert!((weights[0] - 2.0 / 3.0).abs() < 1e-9);
        assert!((weights[1] - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_land_use_projection() {
        let config = ForecastConfig::default();
        let input = vec![series("a", Uf::Para, &[(2018, 100.0), (2019, 100.0), (2020, 100.0)])
            .with_land_use(Some(250.0), Some(1000.0))];
        let model = train(&config, Uf::Para, &input).unwrap();
        let forecast = project(&model, 5);

        let forest: Vec<f64> = forecast.land_use.iter().map(|l| l.forest_area).collect();
        assert_eq!(forest, vec![150.0, 50.0, 0.0, 0.0, 0.0]);
        let last = forecast.land_use.last().unwrap();
        assert!((last.farm_area - 1250.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_forecast_state_installs_model() {
        let registry = Arc::new(ModelRegistry::new());
        let engine = ForecastEngine::new(ForecastConfig::default(), registry.clone());
        let cancel = CancellationToken::new();

        let run = engine
            .forecast_state(Uf::Para, vec![ramp("a", Uf::Para, 10.0, 2.0)], &cancel)
            .await
            .unwrap();
        assert!(run.retrained);
        assert_eq!(run.forecast.points.len(), 5);
        assert_eq!(run.forecast.model_version, run.model.version);
        assert_eq!(registry.get(Uf::Para).await.unwrap().version, run.model.version);
    }

    #[tokio::test]
    async fn test_reuse_registered_model() {
        let registry = Arc::new(ModelRegistry::new());
        let config = ForecastConfig {
            reuse_models: true,
            ..ForecastConfig::default()
        };
        let engine = ForecastEngine::new(config, registry.clone());
        let cancel = CancellationToken::new();

        let first = engine
            .forecast_state(Uf::Para, vec![ramp("a", Uf::Para, 10.0, 2.0)], &cancel)
            .await
            .unwrap();
        let second = engine.forecast_state(Uf::Para, vec![], &cancel).await.unwrap();
        assert!(!second.retrained);
        assert_eq!(second.model.version, first.model.version);
    }

    #[tokio::test]
    async fn test_cancelled_run_installs_nothing() {
        let registry = Arc::new(ModelRegistry::new());
        let engine = ForecastEngine::new(ForecastConfig::default(), registry.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .forecast_state(Uf::Para, vec![ramp("a", Uf::Para, 10.0, 2.0)], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::Cancelled));
        assert!(registry.get(Uf::Para).await.is_none());
    }
}
