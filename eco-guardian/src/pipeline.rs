//! Batch orchestration.
//!
//! The document and forecast pipelines run side by side. Within each, jobs
//! fan out on a `JoinSet` bounded by a semaphore; every job ends in exactly
//! one [`JobOutcome`]. Failures are persisted per subject so the read API
//! can explain a missing result, and never abort the rest of the batch.

use chrono::{DateTime, Utc};
use eco_common::config::{Config, InputsConfig};
use eco_common::logging::generate_run_id;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assessment::{AssessmentEngine, AssessmentError, PolicyClassifier, RetryPolicy};
use crate::document::{DocumentExtractor, ExtractionError};
use crate::forecast::{
    load_series_csv, ForecastEngine, ForecastError, ModelRegistry, MunicipalSeries,
    SeriesLoadError,
};
use crate::regions::Uf;
use crate::signals::SignalDetector;
use crate::store::{AnalysisStore, StoreError, SubjectType};

// ============================================================================
// Outcomes
// ============================================================================

/// Final state of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Stored,
    Unavailable { kind: String, reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub subject_type: SubjectType,
    pub subject_id: String,
    #[serde(flatten)]
    pub status: JobStatus,
}

/// Everything one run did, tagged with its run id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<JobOutcome>,
    /// Inputs that could not be read at all
    #[serde(default)]
    pub input_errors: Vec<String>,
}

impl BatchReport {
    pub fn stored(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Stored))
    }

    pub fn unavailable(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Unavailable { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Cancelled))
    }

    /// Outcome for one subject, if it was part of the run.
    pub fn outcome(&self, subject_type: SubjectType, subject_id: &str) -> Option<&JobOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.subject_type == subject_type && o.subject_id == subject_id)
    }

    fn count(&self, pred: impl Fn(&JobStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

// A job failure reduced to its persisted form.
struct Failure {
    kind: String,
    reason: String,
    // The input itself cannot produce a result, so an older one is withdrawn.
    retract: bool,
}

impl Failure {
    fn new(kind: &str, reason: impl ToString) -> Self {
        Self {
            kind: kind.to_string(),
            reason: reason.to_string(),
            retract: false,
        }
    }

    fn retracting(mut self) -> Self {
        self.retract = true;
        self
    }
}

impl From<ExtractionError> for Failure {
    fn from(e: ExtractionError) -> Self {
        Self::new(e.kind(), &e).retracting()
    }
}

impl From<AssessmentError> for Failure {
    fn from(e: AssessmentError) -> Self {
        Self::new(e.kind(), &e)
    }
}

impl From<ForecastError> for Failure {
    fn from(e: ForecastError) -> Self {
        let failure = Self::new(e.kind(), &e);
        match e {
            ForecastError::InsufficientData { .. } | ForecastError::InvalidSeries(_) => {
                failure.retracting()
            }
            _ => failure,
        }
    }
}

impl From<StoreError> for Failure {
    fn from(e: StoreError) -> Self {
        Self::new(e.kind(), &e)
    }
}

// Either the job finished (well or badly) or it was cancelled first.
enum JobEnd {
    Done,
    Failed(Failure),
    Cancelled,
}

// ============================================================================
// Pipeline
// ============================================================================

/// A policy document waiting to be assessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentJob {
    pub id: String,
    pub path: PathBuf,
}

/// List `*.pdf` files in `dir`, ordered by path. The file stem is the document id.
pub fn scan_documents(dir: &Path) -> std::io::Result<Vec<DocumentJob>> {
    let mut jobs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if !is_pdf || !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem() else {
            continue;
        };
        jobs.push(DocumentJob {
            id: stem.to_string_lossy().into_owned(),
            path,
        });
    }
    jobs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(jobs)
}

/// Runs both analysis pipelines against one store.
#[derive(Clone)]
pub struct Pipeline {
    extractor: DocumentExtractor,
    detector: SignalDetector,
    assessments: Arc<AssessmentEngine>,
    forecasts: Arc<ForecastEngine>,
    store: AnalysisStore,
    jurisdiction_hint: Option<String>,
    document_workers: usize,
    forecast_workers: usize,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        classifier: Arc<dyn PolicyClassifier>,
        store: AnalysisStore,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        let assessments = AssessmentEngine::new(
            classifier,
            config.assessment.clone(),
            RetryPolicy::from_config(&config.classifier),
        );
        Self::from_engines(config, assessments, ForecastEngine::new(config.forecast.clone(), registry), store)
    }

    /// Build around engines constructed elsewhere.
    pub fn from_engines(
        config: &Config,
        assessments: AssessmentEngine,
        forecasts: ForecastEngine,
        store: AnalysisStore,
    ) -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            extractor: DocumentExtractor::new(config.assessment.max_document_bytes),
            detector: SignalDetector::new(),
            assessments: Arc::new(assessments),
            forecasts: Arc::new(forecasts),
            store,
            jurisdiction_hint: config.inputs.jurisdiction_hint.clone(),
            document_workers: cpus.min(config.classifier.max_concurrent_requests.max(1)),
            forecast_workers: cpus,
        }
    }

    pub fn store(&self) -> &AnalysisStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        self.forecasts.registry()
    }

    /// Load persisted models into the registry. Returns how many were taken.
    pub async fn restore_models(&self) -> Result<usize, StoreError> {
        let mut restored = 0;
        for model in self.store.list_models().await? {
            let (state, version) = (model.state, model.version);
            if self.registry().restore(model).await {
                debug!(state = %state, version, "Restored state model");
                restored += 1;
            }
        }
        info!(restored, "State models restored from store");
        Ok(restored)
    }

    /// Run every configured input. A missing input skips its pipeline; an
    /// input that cannot be read is logged and listed in the report while
    /// the other pipeline's outcomes are kept.
    pub async fn run(&self, inputs: &InputsConfig, cancel: &CancellationToken) -> BatchReport {
        let run_id = generate_run_id();
        let started_at = Utc::now();
        let start = Instant::now();
        info!(run_id = %run_id, "Batch run started");

        let documents = async {
            match &inputs.documents_dir {
                Some(dir) => self
                    .run_documents(dir, &run_id, cancel)
                    .await
                    .map_err(|e| format!("cannot scan documents in {}: {e}", dir.display())),
                None => Ok(Vec::new()),
            }
        };
        let forecasts = async {
            match &inputs.series_csv {
                Some(csv) => self
                    .run_forecasts(csv, &run_id, cancel)
                    .await
                    .map_err(|e| format!("cannot load series from {}: {e}", csv.display())),
                None => Ok(Vec::new()),
            }
        };
        let (documents, forecasts) = tokio::join!(documents, forecasts);

        let mut outcomes = Vec::new();
        let mut input_errors = Vec::new();
        for result in [documents, forecasts] {
            match result {
                Ok(done) => outcomes.extend(done),
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Input skipped");
                    input_errors.push(e);
                }
            }
        }

        let report = BatchReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            input_errors,
        };
        info!(
            run_id = %report.run_id,
            stored = report.stored(),
            unavailable = report.unavailable(),
            cancelled = report.cancelled(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch run finished"
        );
        report
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Assess every PDF in `dir`.
    pub async fn run_documents(
        &self,
        dir: &Path,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> std::io::Result<Vec<JobOutcome>> {
        let jobs = scan_documents(dir)?;
        info!(documents = jobs.len(), workers = self.document_workers, "Assessing documents");
        Ok(self.assess_documents(jobs, run_id, cancel).await)
    }

    /// Assess the given documents concurrently.
    pub async fn assess_documents(
        &self,
        jobs: Vec<DocumentJob>,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Vec<JobOutcome> {
        let permits = Arc::new(Semaphore::new(self.document_workers));
        let mut join_set: JoinSet<JobOutcome> = JoinSet::new();

        for job in jobs {
            let this = self.clone();
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            let run_id = run_id.to_string();
            join_set.spawn(async move {
                let end = match acquire(&permits, &cancel).await {
                    Some(_permit) => this.assess_document(&job, &cancel).await,
                    None => JobEnd::Cancelled,
                };
                this.settle(SubjectType::Document, job.id, end, &run_id).await
            });
        }

        collect(join_set).await
    }

    async fn assess_document(&self, job: &DocumentJob, cancel: &CancellationToken) -> JobEnd {
        let bytes = match tokio::fs::read(&job.path).await {
            Ok(bytes) => bytes,
            Err(e) => return JobEnd::Failed(Failure::new("document.io", e)),
        };

        // Parsing and detection are CPU-bound.
        let extractor = self.extractor.clone();
        let detector = self.detector.clone();
        let id = job.id.clone();
        let hint = self.jurisdiction_hint.clone();
        let prepared = tokio::task::spawn_blocking(move || {
            extractor.extract(Some(id), hint, bytes).map(|document| {
                let signals = detector.detect(document.pages());
                (document, signals)
            })
        })
        .await;
        let (document, signals) = match prepared {
            Ok(Ok(prepared)) => prepared,
            Ok(Err(e)) => {
                warn!(document_id = %job.id, error = %e, "Document extraction failed");
                return JobEnd::Failed(e.into());
            }
            Err(e) => return JobEnd::Failed(Failure::new("document.task", e)),
        };
        debug!(document_id = %job.id, signals = signals.len(), "Signals detected");

        let assessed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return JobEnd::Cancelled,
            assessed = self.assessments.assess(&document, &signals, None) => assessed,
        };
        let assessment = match assessed {
            Ok(assessment) => assessment,
            Err(e) => {
                warn!(document_id = %job.id, kind = e.kind(), error = %e, "Assessment failed");
                return JobEnd::Failed(e.into());
            }
        };
        if cancel.is_cancelled() {
            return JobEnd::Cancelled;
        }

        match self.store.put_assessment(&assessment).await {
            Ok(()) => {
                info!(
                    document_id = %job.id,
                    entity = %assessment.responsible_entity,
                    unscored = assessment.unscored().len(),
                    attempts = assessment.attempts,
                    "Assessment stored"
                );
                JobEnd::Done
            }
            Err(e) => JobEnd::Failed(e.into()),
        }
    }

    // ========================================================================
    // Forecasts
    // ========================================================================

    /// Forecast every state present in the series CSV.
    pub async fn run_forecasts(
        &self,
        csv: &Path,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<JobOutcome>, SeriesLoadError> {
        let path = csv.to_path_buf();
        let report = tokio::task::spawn_blocking(move || load_series_csv(&path))
            .await
            .map_err(|e| SeriesLoadError::Io(std::io::Error::other(e.to_string())))??;
        if report.dropped_rows > 0 {
            warn!(dropped = report.dropped_rows, "Series rows dropped while loading");
        }
        Ok(self.forecast_states(report.by_state().into_iter().collect(), run_id, cancel).await)
    }

    /// Forecast the given states concurrently.
    pub async fn forecast_states(
        &self,
        states: Vec<(Uf, Vec<MunicipalSeries>)>,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Vec<JobOutcome> {
        info!(states = states.len(), workers = self.forecast_workers, "Forecasting states");
        let permits = Arc::new(Semaphore::new(self.forecast_workers));
        let mut join_set: JoinSet<JobOutcome> = JoinSet::new();

        for (state, series) in states {
            let this = self.clone();
            let permits = Arc::clone(&permits);
            let cancel = cancel.clone();
            let run_id = run_id.to_string();
            join_set.spawn(async move {
                let end = match acquire(&permits, &cancel).await {
                    Some(_permit) => this.forecast_state(state, series, &cancel).await,
                    None => JobEnd::Cancelled,
                };
                this.settle(SubjectType::State, state.sigla().to_string(), end, &run_id)
                    .await
            });
        }

        collect(join_set).await
    }

    async fn forecast_state(
        &self,
        state: Uf,
        series: Vec<MunicipalSeries>,
        cancel: &CancellationToken,
    ) -> JobEnd {
        let run = match self.forecasts.forecast_state(state, series, cancel).await {
            Ok(run) => run,
            Err(ForecastError::Cancelled) => return JobEnd::Cancelled,
            Err(e) => {
                warn!(state = %state, kind = e.kind(), error = %e, "Forecast unavailable");
                return JobEnd::Failed(e.into());
            }
        };
        if cancel.is_cancelled() {
            return JobEnd::Cancelled;
        }

        if run.retrained {
            if let Err(e) = self.store.put_model(&run.model).await {
                return JobEnd::Failed(e.into());
            }
        }
        match self.store.put_forecast(&run.forecast).await {
            Ok(()) => {
                info!(
                    state = %state,
                    version = run.model.version,
                    points = run.forecast.points.len(),
                    gaps = run.forecast.gaps.len(),
                    "Forecast stored"
                );
                JobEnd::Done
            }
            Err(e) => JobEnd::Failed(e.into()),
        }
    }

    // ========================================================================
    // Shared
    // ========================================================================

    // Persist a failure and turn the job end into its outcome. Failures caused
    // by the input withdraw the subject's older result; transient ones keep it.
    async fn settle(
        &self,
        subject_type: SubjectType,
        subject_id: String,
        end: JobEnd,
        run_id: &str,
    ) -> JobOutcome {
        let status = match end {
            JobEnd::Done => JobStatus::Stored,
            JobEnd::Cancelled => JobStatus::Cancelled,
            JobEnd::Failed(failure) => {
                let recorded = if failure.retract {
                    self.store
                        .retract(subject_type, &subject_id, &failure.kind, &failure.reason, run_id)
                        .await
                } else {
                    self.store
                        .record_failure(subject_type, &subject_id, &failure.kind, &failure.reason, run_id)
                        .await
                };
                if let Err(e) = recorded {
                    error!(
                        subject_type = %subject_type,
                        subject_id = %subject_id,
                        error = %e,
                        "Failed to record failure"
                    );
                }
                JobStatus::Unavailable {
                    kind: failure.kind,
                    reason: failure.reason,
                }
            }
        };
        JobOutcome {
            subject_type,
            subject_id,
            status,
        }
    }
}

async fn acquire<'a>(
    permits: &'a Semaphore,
    cancel: &CancellationToken,
) -> Option<tokio::sync::SemaphorePermit<'a>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = permits.acquire() => permit.ok(),
    }
}

async fn collect(mut join_set: JoinSet<JobOutcome>) -> Vec<JobOutcome> {
    let mut outcomes = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            // Task panicked; its subject is lost with it
            Err(e) => error!(error = %e, "Pipeline job failed to complete"),
        }
    }
    outcomes.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_documents_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_plano.PDF"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("a_lei.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub.pdf")).unwrap();

        let jobs = scan_documents(dir.path()).unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a_lei", "b_plano"]);
    }

    #[test]
    fn test_scan_missing_dir() {
        assert!(scan_documents(Path::new("/nonexistent/eco-guardian-docs")).is_err());
    }

    #[test]
    fn test_report_counts() {
        let outcome = |id: &str, status| JobOutcome {
            subject_type: SubjectType::State,
            subject_id: id.to_string(),
            status,
        };
        let report = BatchReport {
            run_id: "run".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcomes: vec![
                outcome("AC", JobStatus::Stored),
                outcome(
                    "PA",
                    JobStatus::Unavailable {
                        kind: "forecast.insufficient_data".into(),
                        reason: "2 years".into(),
                    },
                ),
                outcome("MT", JobStatus::Cancelled),
            ],
            input_errors: vec![],
        };
        assert_eq!(report.stored(), 1);
        assert_eq!(report.unavailable(), 1);
        assert_eq!(report.cancelled(), 1);
        assert!(report.outcome(SubjectType::State, "PA").is_some());
        assert!(report.outcome(SubjectType::Document, "PA").is_none());
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = JobOutcome {
            subject_type: SubjectType::Document,
            subject_id: "lei-123".into(),
            status: JobStatus::Unavailable {
                kind: "extraction.no_pages".into(),
                reason: "empty".into(),
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["subject_type"], "document");
        assert_eq!(json["kind"], "extraction.no_pages");
    }
}
