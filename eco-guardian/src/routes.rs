//! Read API for the presentation layer.
//!
//! Provides REST API endpoints for:
//! - Stored policy assessments
//! - State forecasts and the models behind them
//!
//! A subject without a result but with a recorded failure answers 404 with
//! the failure kind and reason, so the caller can say why it is missing.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::assessment::PolicyAssessment;
use crate::forecast::{ModelRegistry, StateForecast, StateForecastModel, TrainingWindow};
use crate::regions::Uf;
use crate::store::{AnalysisStore, StoreError, SubjectType};

// ============================================================================
// State
// ============================================================================

/// Shared state for the read API.
pub struct GuardianState {
    /// Result store
    pub store: AnalysisStore,
    /// Current state models
    pub registry: Arc<ModelRegistry>,
}

/// Create the API state.
pub fn create_state(store: AnalysisStore, registry: Arc<ModelRegistry>) -> Arc<GuardianState> {
    Arc::new(GuardianState { store, registry })
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Body of a 404 for a subject whose last run failed.
#[derive(Debug, Serialize, Deserialize)]
pub struct UnavailableResponse {
    pub status: String,
    pub kind: String,
    pub reason: String,
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Model metadata without the fitted parameters.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelSummary {
    pub state: Uf,
    pub version: u64,
    pub window: TrainingWindow,
    pub trained_at: DateTime<Utc>,
    pub municipalities: usize,
    pub skipped: usize,
}

impl From<&StateForecastModel> for ModelSummary {
    fn from(model: &StateForecastModel) -> Self {
        Self {
            state: model.state,
            version: model.version,
            window: model.window,
            trained_at: model.trained_at,
            municipalities: model.params.municipalities.len(),
            skipped: model.params.skipped.len(),
        }
    }
}

enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(UnavailableResponse),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = |status: StatusCode, msg: String| {
            let body: ApiResponse<()> = ApiResponse {
                success: false,
                data: None,
                error: Some(msg),
            };
            (status, Json(body)).into_response()
        };
        match self {
            Self::BadRequest(msg) => error(StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => error(StatusCode::NOT_FOUND, msg),
            Self::Unavailable(body) => (StatusCode::NOT_FOUND, Json(body)).into_response(),
            Self::Store(e) => {
                tracing::error!(kind = e.kind(), error = %e, "Store read failed");
                error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

// A missing result becomes either a plain 404 or the recorded failure.
async fn missing(
    state: &GuardianState,
    subject_type: SubjectType,
    subject_id: &str,
) -> ApiError {
    match state.store.get_failure(subject_type, subject_id).await {
        Ok(Some(failure)) => ApiError::Unavailable(UnavailableResponse {
            status: "unavailable".to_string(),
            kind: failure.kind,
            reason: failure.reason,
            run_id: failure.run_id,
            recorded_at: failure.recorded_at,
        }),
        Ok(None) => ApiError::NotFound(format!("no {subject_type} '{subject_id}'")),
        Err(e) => ApiError::Store(e),
    }
}

// ============================================================================
// Health Routes
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "eco-guardian",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Assessment Routes
// ============================================================================

async fn list_assessments(
    State(state): State<Arc<GuardianState>>,
) -> ApiResult<Vec<PolicyAssessment>> {
    Ok(Json(ApiResponse::success(state.store.list_assessments().await?)))
}

async fn get_assessment(
    State(state): State<Arc<GuardianState>>,
    Path(id): Path<String>,
) -> ApiResult<PolicyAssessment> {
    match state.store.get_assessment(&id).await? {
        Some(assessment) => Ok(Json(ApiResponse::success(assessment))),
        None => Err(missing(&state, SubjectType::Document, &id).await),
    }
}

// ============================================================================
// Forecast Routes
// ============================================================================

async fn list_forecasts(State(state): State<Arc<GuardianState>>) -> ApiResult<Vec<StateForecast>> {
    Ok(Json(ApiResponse::success(state.store.list_forecasts().await?)))
}

async fn get_forecast(
    State(state): State<Arc<GuardianState>>,
    Path(raw): Path<String>,
) -> ApiResult<StateForecast> {
    let uf: Uf = raw
        .parse()
        .map_err(|e: crate::regions::UnknownRegion| ApiError::BadRequest(e.to_string()))?;
    match state.store.get_forecast(uf).await? {
        Some(forecast) => Ok(Json(ApiResponse::success(forecast))),
        None => Err(missing(&state, SubjectType::State, uf.sigla()).await),
    }
}

async fn list_models(State(state): State<Arc<GuardianState>>) -> Json<ApiResponse<Vec<ModelSummary>>> {
    let models = state
        .registry
        .snapshot()
        .await
        .iter()
        .map(|m| ModelSummary::from(m.as_ref()))
        .collect();
    Json(ApiResponse::success(models))
}

// ============================================================================
// Router
// ============================================================================

/// Build the read API router.
pub fn build_router(state: Arc<GuardianState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/assessments", get(list_assessments))
        .route("/api/v1/assessments/:id", get(get_assessment))
        .route("/api/v1/forecasts", get(list_forecasts))
        .route("/api/v1/forecasts/:state", get(get_forecast))
        .route("/api/v1/models", get(list_models))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{ForecastPoint, ModelParams};
    use axum::body::Body;
    use axum::http::Request;
    use eco_common::config::AreaWeighting;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn create_test_state() -> Arc<GuardianState> {
        create_state(AnalysisStore::in_memory().unwrap(), Arc::new(ModelRegistry::new()))
    }

    async fn get_json(state: Arc<GuardianState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = build_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn forecast(state: Uf) -> StateForecast {
        StateForecast {
            state,
            model_version: 1,
            window: TrainingWindow {
                first_year: 2016,
                last_year: 2020,
            },
            points: (2021..2026)
                .map(|year| ForecastPoint {
                    state,
                    year,
                    estimate: 100.0,
                    lower: 80.0,
                    upper: 120.0,
                    contributing: 3,
                })
                .collect(),
            gaps: vec![],
            land_use: vec![],
            skipped: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = get_json(create_test_state(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "eco-guardian");
    }

    #[tokio::test]
    async fn test_list_assessments_empty() {
        let (status, body) = get_json(create_test_state(), "/api/v1/assessments").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forecast_by_name_or_sigla() {
        let state = create_test_state();
        state.store.put_forecast(&forecast(Uf::Para)).await.unwrap();

        let (status, body) = get_json(Arc::clone(&state), "/api/v1/forecasts/PA").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["points"].as_array().unwrap().len(), 5);

        let (status, _) = get_json(Arc::clone(&state), "/api/v1/forecasts/para").await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = get_json(state, "/api/v1/forecasts/XX").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_with_failure_is_unavailable() {
        let state = create_test_state();
        state
            .store
            .record_failure(
                SubjectType::State,
                "AC",
                "forecast.insufficient_data",
                "only 2 years",
                "run-1",
            )
            .await
            .unwrap();

        let (status, body) = get_json(Arc::clone(&state), "/api/v1/forecasts/AC").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "unavailable");
        assert_eq!(body["kind"], "forecast.insufficient_data");
        assert_eq!(body["reason"], "only 2 years");

        let (status, body) = get_json(state, "/api/v1/assessments/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_models_summary() {
        let state = create_test_state();
        state
            .registry
            .install(StateForecastModel {
                state: Uf::Amazonas,
                version: 0,
                window: TrainingWindow {
                    first_year: 2010,
                    last_year: 2020,
                },
                trained_at: Utc::now(),
                params: ModelParams {
                    municipalities: vec![],
                    weighting: AreaWeighting::MostRecentYear,
                    interval_level: 0.95,
                    skipped: vec![],
                },
            })
            .await;

        let (status, body) = get_json(state, "/api/v1/models").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["state"], "AM");
        assert_eq!(body["data"][0]["version"], 1);
    }
}
