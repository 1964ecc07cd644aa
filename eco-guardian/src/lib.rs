//! Eco Guardian - environmental policy assessment and deforestation forecasting.
//!
//! This crate provides:
//! - PDF policy document extraction and quantitative signal detection
//! - Six-criterion policy assessment through a text-classification service
//! - Per-state deforestation forecasts aggregated from municipal trends
//! - SQLite persistence of results, models and failures
//! - A read-only HTTP API for the presentation layer

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod assessment;
pub mod document;
pub mod forecast;
pub mod pipeline;
pub mod regions;
pub mod routes;
pub mod signals;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use eco_common::config::Config;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

pub use assessment::{AssessmentEngine, OpenAiClassifier, PolicyAssessment, PolicyClassifier};
pub use document::{DocumentExtractor, PolicyDocument};
pub use forecast::{ForecastEngine, ModelRegistry, StateForecast};
pub use pipeline::{BatchReport, JobOutcome, JobStatus, Pipeline};
pub use routes::{build_router, create_state, GuardianState};
pub use store::AnalysisStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Guardian Service
// ============================================================================

/// Runs the batch pipelines, then serves the read API.
pub struct GuardianService {
    config: Config,
}

impl GuardianService {
    /// Create a new guardian service.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Build the read API router with its layers.
    pub fn build_router(&self, state: Arc<GuardianState>) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        build_router(state)
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(cors)
    }

    /// Open the store and wire the pipeline to the configured classifier.
    pub async fn pipeline(&self) -> anyhow::Result<Pipeline> {
        let store = AnalysisStore::from_config(&self.config.store).with_context(|| {
            format!("Failed to open store at {}", self.config.store.db_path.display())
        })?;
        let classifier: Arc<dyn PolicyClassifier> = Arc::new(
            OpenAiClassifier::new(&self.config.classifier)
                .context("Failed to build classifier client")?,
        );
        let pipeline = Pipeline::new(&self.config, classifier, store, Arc::new(ModelRegistry::new()));

        pipeline
            .restore_models()
            .await
            .context("Failed to restore state models")?;
        Ok(pipeline)
    }

    /// Start the guardian service.
    pub async fn start(&self) -> anyhow::Result<()> {
        tracing::info!("Starting Eco Guardian service");

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                on_signal.cancel();
            }
        });

        let pipeline = self.pipeline().await?;
        let report = pipeline.run(&self.config.inputs, &cancel).await;
        for outcome in &report.outcomes {
            if let JobStatus::Unavailable { kind, reason } = &outcome.status {
                tracing::warn!(
                    subject_type = %outcome.subject_type,
                    subject_id = %outcome.subject_id,
                    kind = %kind,
                    reason = %reason,
                    "Result unavailable"
                );
            }
        }

        if !self.config.server.enabled || cancel.is_cancelled() {
            return Ok(());
        }

        let state = create_state(pipeline.store().clone(), Arc::clone(pipeline.registry()));
        let router = self.build_router(state);

        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid bind address {}:{}",
                    self.config.server.host, self.config.server.port
                )
            })?;

        tracing::info!("Starting Eco Guardian HTTP server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        Ok(())
    }
}
