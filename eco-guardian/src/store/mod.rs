//! SQLite persistence for assessments, forecasts, models and failures.
//!
//! Every put is one transaction keyed by document id or state, so readers
//! see either the previous value or the new one. A successful put clears
//! any failure recorded for the same subject; a retraction deletes the
//! result and records the failure together.

use chrono::{DateTime, Utc};
use eco_common::config::StoreConfig;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::assessment::PolicyAssessment;
use crate::forecast::{StateForecast, StateForecastModel, TrainingWindow};
use crate::regions::Uf;

// ============================================================================
// Database Schema
// ============================================================================

const CREATE_TABLES_SQL: &str = r#"
-- One assessment per document; re-assessment replaces the row
CREATE TABLE IF NOT EXISTS policy_assessments (
    document_id TEXT PRIMARY KEY,
    assessment_id TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    responsible_entity TEXT NOT NULL,
    mean_score REAL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- One forecast series per state
CREATE TABLE IF NOT EXISTS state_forecasts (
    state TEXT PRIMARY KEY,
    model_version INTEGER NOT NULL,
    payload_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT DEFAULT CURRENT_TIMESTAMP
);

-- Flattened points of the current forecast, for the presentation layer
CREATE TABLE IF NOT EXISTS forecast_points (
    state TEXT NOT NULL,
    year INTEGER NOT NULL,
    estimate REAL NOT NULL,
    lower_bound REAL NOT NULL,
    upper_bound REAL NOT NULL,
    PRIMARY KEY (state, year)
);

-- Current trained model per state
CREATE TABLE IF NOT EXISTS state_models (
    state TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    first_year INTEGER NOT NULL,
    last_year INTEGER NOT NULL,
    trained_at TEXT NOT NULL,
    params_blob TEXT NOT NULL
);

-- Why a subject has no current result
CREATE TABLE IF NOT EXISTS pipeline_failures (
    subject_type TEXT NOT NULL,
    subject_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    reason TEXT NOT NULL,
    run_id TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (subject_type, subject_id)
);
"#;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "store.sqlite",
            Self::Io(_) => "store.io",
            Self::Serialization(_) => "store.serialization",
            Self::Corrupt(_) => "store.corrupt",
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What a failure record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    Document,
    State,
}

impl SubjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectType::Document => "document",
            SubjectType::State => "state",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(SubjectType::Document),
            "state" => Some(SubjectType::State),
            _ => None,
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted reason a subject has no current result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub kind: String,
    pub reason: String,
    pub run_id: String,
    pub recorded_at: DateTime<Utc>,
}

// ============================================================================
// Store
// ============================================================================

/// Result store shared by the pipelines and the read API.
#[derive(Clone)]
pub struct AnalysisStore {
    // Mutex rather than RwLock: Connection is Send but not Sync.
    db: Arc<Mutex<Connection>>,
}

impl AnalysisStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;
        info!(db_path = %path.display(), "Initialized analysis store");
        Ok(store)
    }

    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        Self::open(&config.db_path)
    }

    /// Private in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(CREATE_TABLES_SQL)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    // ========================================================================
    // Assessments
    // ========================================================================

    /// Upsert by document id.
    pub async fn put_assessment(&self, assessment: &PolicyAssessment) -> StoreResult<()> {
        let json = serde_json::to_string(assessment)?;
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            r#"
            INSERT INTO policy_assessments
            (document_id, assessment_id, fingerprint, responsible_entity, mean_score, payload_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(document_id) DO UPDATE SET
                assessment_id = excluded.assessment_id,
                fingerprint = excluded.fingerprint,
                responsible_entity = excluded.responsible_entity,
                mean_score = excluded.mean_score,
                payload_json = excluded.payload_json,
                created_at = excluded.created_at,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                assessment.document_id,
                assessment.id.to_string(),
                assessment.document_fingerprint,
                assessment.responsible_entity,
                assessment.mean_score(),
                json,
                assessment.created_at.to_rfc3339(),
            ],
        )?;
        clear_failure(&tx, SubjectType::Document, &assessment.document_id)?;
        tx.commit()?;

        debug!(document_id = %assessment.document_id, "Stored assessment");
        Ok(())
    }

    pub async fn get_assessment(&self, document_id: &str) -> StoreResult<Option<PolicyAssessment>> {
        let db = self.db.lock().await;
        let json: Option<String> = db
            .query_row(
                "SELECT payload_json FROM policy_assessments WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }

    /// All assessments ordered by document id.
    pub async fn list_assessments(&self) -> StoreResult<Vec<PolicyAssessment>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT payload_json FROM policy_assessments ORDER BY document_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut assessments = Vec::new();
        for json in rows {
            assessments.push(serde_json::from_str(&json?)?);
        }
        Ok(assessments)
    }

    // ========================================================================
    // Forecasts
    // ========================================================================

    /// Upsert by state, replacing the flattened points in the same transaction.
    pub async fn put_forecast(&self, forecast: &StateForecast) -> StoreResult<()> {
        let json = serde_json::to_string(forecast)?;
        let state = forecast.state.sigla();
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute(
            r#"
            INSERT INTO state_forecasts (state, model_version, payload_json, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(state) DO UPDATE SET
                model_version = excluded.model_version,
                payload_json = excluded.payload_json,
                created_at = excluded.created_at,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                state,
                forecast.model_version as i64,
                json,
                forecast.created_at.to_rfc3339(),
            ],
        )?;
        tx.execute("DELETE FROM forecast_points WHERE state = ?1", params![state])?;
        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO forecast_points (state, year, estimate, lower_bound, upper_bound)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for point in &forecast.points {
                insert.execute(params![
                    state,
                    point.year,
                    point.estimate,
                    point.lower,
                    point.upper
                ])?;
            }
        }
        clear_failure(&tx, SubjectType::State, state)?;
        tx.commit()?;

        debug!(state, points = forecast.points.len(), "Stored forecast");
        Ok(())
    }

    pub async fn get_forecast(&self, state: Uf) -> StoreResult<Option<StateForecast>> {
        let db = self.db.lock().await;
        let json: Option<String> = db
            .query_row(
                "SELECT payload_json FROM state_forecasts WHERE state = ?1",
                params![state.sigla()],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }

    /// All forecasts ordered by state abbreviation.
    pub async fn list_forecasts(&self) -> StoreResult<Vec<StateForecast>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare("SELECT payload_json FROM state_forecasts ORDER BY state")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut forecasts = Vec::new();
        for json in rows {
            forecasts.push(serde_json::from_str(&json?)?);
        }
        Ok(forecasts)
    }

    // ========================================================================
    // Models
    // ========================================================================

    pub async fn put_model(&self, model: &StateForecastModel) -> StoreResult<()> {
        let blob = model
            .params_blob()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT OR REPLACE INTO state_models
            (state, version, first_year, last_year, trained_at, params_blob)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                model.state.sigla(),
                model.version as i64,
                model.window.first_year,
                model.window.last_year,
                model.trained_at.to_rfc3339(),
                blob,
            ],
        )?;
        debug!(state = %model.state, version = model.version, "Stored model");
        Ok(())
    }

    pub async fn get_model(&self, state: Uf) -> StoreResult<Option<StateForecastModel>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                r#"
                SELECT state, version, first_year, last_year, trained_at, params_blob
                FROM state_models WHERE state = ?1
                "#,
                params![state.sigla()],
                ModelRow::from_row,
            )
            .optional()?;
        row.map(ModelRow::into_model).transpose()
    }

    /// All stored models ordered by state abbreviation.
    pub async fn list_models(&self) -> StoreResult<Vec<StateForecastModel>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            r#"
            SELECT state, version, first_year, last_year, trained_at, params_blob
            FROM state_models ORDER BY state
            "#,
        )?;
        let rows = stmt.query_map([], ModelRow::from_row)?;

        let mut models = Vec::new();
        for row in rows {
            models.push(row?.into_model()?);
        }
        Ok(models)
    }

    // ========================================================================
    // Failures
    // ========================================================================

    /// Record why `subject_id` has no current result, replacing any older
    /// record. An earlier stored result stays in place.
    pub async fn record_failure(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        kind: &str,
        reason: &str,
        run_id: &str,
    ) -> StoreResult<()> {
        let db = self.db.lock().await;
        insert_failure(&db, subject_type, subject_id, kind, reason, run_id)?;
        debug!(subject_type = %subject_type, subject_id, kind, "Recorded failure");
        Ok(())
    }

    /// Record a failure and delete the subject's stored result in the same
    /// transaction. Trained models are left alone.
    pub async fn retract(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        kind: &str,
        reason: &str,
        run_id: &str,
    ) -> StoreResult<()> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        let removed = match subject_type {
            SubjectType::Document => tx.execute(
                "DELETE FROM policy_assessments WHERE document_id = ?1",
                params![subject_id],
            )?,
            SubjectType::State => {
                tx.execute("DELETE FROM forecast_points WHERE state = ?1", params![subject_id])?;
                tx.execute("DELETE FROM state_forecasts WHERE state = ?1", params![subject_id])?
            }
        };
        insert_failure(&tx, subject_type, subject_id, kind, reason, run_id)?;
        tx.commit()?;
        debug!(subject_type = %subject_type, subject_id, kind, removed, "Retracted result");
        Ok(())
    }

    pub async fn get_failure(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> StoreResult<Option<FailureRecord>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                r#"
                SELECT subject_type, subject_id, kind, reason, run_id, recorded_at
                FROM pipeline_failures WHERE subject_type = ?1 AND subject_id = ?2
                "#,
                params![subject_type.as_str(), subject_id],
                FailureRow::from_row,
            )
            .optional()?;
        row.map(FailureRow::into_record).transpose()
    }

    pub async fn list_failures(&self) -> StoreResult<Vec<FailureRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            r#"
            SELECT subject_type, subject_id, kind, reason, run_id, recorded_at
            FROM pipeline_failures ORDER BY subject_type, subject_id
            "#,
        )?;
        let rows = stmt.query_map([], FailureRow::from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

fn insert_failure(
    conn: &Connection,
    subject_type: SubjectType,
    subject_id: &str,
    kind: &str,
    reason: &str,
    run_id: &str,
) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO pipeline_failures
        (subject_type, subject_id, kind, reason, run_id, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            subject_type.as_str(),
            subject_id,
            kind,
            reason,
            run_id,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn clear_failure(conn: &Connection, subject_type: SubjectType, subject_id: &str) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM pipeline_failures WHERE subject_type = ?1 AND subject_id = ?2",
        params![subject_type.as_str(), subject_id],
    )?;
    Ok(())
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn parse_state(raw: &str) -> StoreResult<Uf> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("bad state '{raw}': {e}")))
}

// Raw columns, converted outside the rusqlite row closure.
struct ModelRow {
    state: String,
    version: i64,
    first_year: i32,
    last_year: i32,
    trained_at: String,
    blob: String,
}

impl ModelRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            state: row.get(0)?,
            version: row.get(1)?,
            first_year: row.get(2)?,
            last_year: row.get(3)?,
            trained_at: row.get(4)?,
            blob: row.get(5)?,
        })
    }

    fn into_model(self) -> StoreResult<StateForecastModel> {
        StateForecastModel::from_blob(
            parse_state(&self.state)?,
            u64::try_from(self.version)
                .map_err(|_| StoreError::Corrupt(format!("negative model version {}", self.version)))?,
            TrainingWindow {
                first_year: self.first_year,
                last_year: self.last_year,
            },
            parse_timestamp(&self.trained_at)?,
            &self.blob,
        )
        .map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

struct FailureRow {
    subject_type: String,
    subject_id: String,
    kind: String,
    reason: String,
    run_id: String,
    recorded_at: String,
}

impl FailureRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            subject_type: row.get(0)?,
            subject_id: row.get(1)?,
            kind: row.get(2)?,
            reason: row.get(3)?,
            run_id: row.get(4)?,
            recorded_at: row.get(5)?,
        })
    }

    fn into_record(self) -> StoreResult<FailureRecord> {
        let subject_type = SubjectType::parse(&self.subject_type)
            .ok_or_else(|| StoreError::Corrupt(format!("bad subject type '{}'", self.subject_type)))?;
        Ok(FailureRecord {
            subject_type,
            subject_id: self.subject_id,
            kind: self.kind,
            reason: self.reason,
            run_id: self.run_id,
            recorded_at: parse_timestamp(&self.recorded_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::{Criterion, CriterionScore, EntitySource, Score};
    use crate::forecast::{ForecastPoint, ModelParams};
    use eco_common::config::AreaWeighting;
    use uuid::Uuid;

    fn assessment(document_id: &str, entity: &str) -> PolicyAssessment {
        PolicyAssessment {
            id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            document_fingerprint: "f".repeat(64),
            responsible_entity: entity.to_string(),
            entity_source: EntitySource::Document,
            criteria: Criterion::ALL.map(|criterion| CriterionScore {
                criterion,
                score: Score::Rated { value: 4 },
                justification: "ok".into(),
                supporting_signals: vec![],
            }),
            summary: format!("{entity} ..."),
            created_at: Utc::now(),
            model: "m".into(),
            attempts: 1,
            signals: vec![],
            text_preview: String::new(),
            truncated: false,
        }
    }

    fn forecast(state: Uf, version: u64) -> StateForecast {
        StateForecast {
            state,
            model_version: version,
            window: TrainingWindow {
                first_year: 2015,
                last_year: 2020,
            },
            points: (2021..2026)
                .map(|year| ForecastPoint {
                    state,
                    year,
                    estimate: 10.0,
                    lower: 5.0,
                    upper: 15.0,
                    contributing: 2,
                })
                .collect(),
            gaps: vec![],
            land_use: vec![],
            skipped: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_assessment_upsert_keeps_latest() {
        let store = AnalysisStore::in_memory().unwrap();
        assert!(store.get_assessment("doc").await.unwrap().is_none());

        store.put_assessment(&assessment("doc", "Governo Federal")).await.unwrap();
        let second = assessment("doc", "Governo do Estado do Pará");
        store.put_assessment(&second).await.unwrap();
        store.put_assessment(&second).await.unwrap();

        let all = store.list_assessments().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[0].criteria.len(), 6);
    }

    #[tokio::test]
    async fn test_forecast_points_replaced() {
        let store = AnalysisStore::in_memory().unwrap();
        store.put_forecast(&forecast(Uf::Para, 1)).await.unwrap();
        let mut newer = forecast(Uf::Para, 2);
        newer.points.truncate(3);
        store.put_forecast(&newer).await.unwrap();

        let stored = store.get_forecast(Uf::Para).await.unwrap().unwrap();
        assert_eq!(stored.model_version, 2);
        assert!(store.get_forecast(Uf::Acre).await.unwrap().is_none());

        let db = store.db.lock().await;
        let count: i64 = db
            .query_row("SELECT COUNT(*) FROM forecast_points WHERE state = 'PA'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_put_clears_failure() {
        let store = AnalysisStore::in_memory().unwrap();
        store
            .record_failure(SubjectType::State, "PA", "forecast.insufficient_data", "2 years", "run-1")
            .await
            .unwrap();
        store
            .record_failure(SubjectType::Document, "doc", "extraction.no_pages", "empty", "run-1")
            .await
            .unwrap();
        assert_eq!(store.list_failures().await.unwrap().len(), 2);

        store.put_forecast(&forecast(Uf::Para, 1)).await.unwrap();
        assert!(store.get_failure(SubjectType::State, "PA").await.unwrap().is_none());

        let doc = store.get_failure(SubjectType::Document, "doc").await.unwrap().unwrap();
        assert_eq!(doc.kind, "extraction.no_pages");
        assert_eq!(doc.run_id, "run-1");
    }

    #[tokio::test]
    async fn test_retract_removes_result_but_not_model() {
        let store = AnalysisStore::in_memory().unwrap();
        store.put_forecast(&forecast(Uf::Para, 1)).await.unwrap();
        store.put_assessment(&assessment("doc", "Governo Federal")).await.unwrap();

        store
            .retract(SubjectType::State, "PA", "forecast.insufficient_data", "2 years", "run-2")
            .await
            .unwrap();
        store
            .retract(SubjectType::Document, "doc", "extraction.no_text", "blank", "run-2")
            .await
            .unwrap();

        assert!(store.get_forecast(Uf::Para).await.unwrap().is_none());
        assert!(store.list_forecasts().await.unwrap().is_empty());
        assert!(store.get_assessment("doc").await.unwrap().is_none());
        assert_eq!(store.list_failures().await.unwrap().len(), 2);

        let db = store.db.lock().await;
        let points: i64 = db
            .query_row("SELECT COUNT(*) FROM forecast_points WHERE state = 'PA'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(points, 0);
    }

    #[tokio::test]
    async fn test_record_failure_keeps_result() {
        let store = AnalysisStore::in_memory().unwrap();
        store.put_forecast(&forecast(Uf::Para, 1)).await.unwrap();
        store
            .record_failure(SubjectType::State, "PA", "store.sqlite", "locked", "run-2")
            .await
            .unwrap();

        assert!(store.get_forecast(Uf::Para).await.unwrap().is_some());
        assert!(store.get_failure(SubjectType::State, "PA").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_model_round_trip() {
        let store = AnalysisStore::in_memory().unwrap();
        let model = StateForecastModel {
            state: Uf::MatoGrosso,
            version: 4,
            window: TrainingWindow {
                first_year: 2008,
                last_year: 2022,
            },
            trained_at: Utc::now(),
            params: ModelParams {
                municipalities: vec![],
                weighting: AreaWeighting::MultiYearAverage,
                interval_level: 0.9,
                skipped: vec![],
            },
        };
        store.put_model(&model).await.unwrap();

        let loaded = store.get_model(Uf::MatoGrosso).await.unwrap().unwrap();
        assert_eq!(loaded.version, 4);
        assert_eq!(loaded.params, model.params);
        assert_eq!(store.list_models().await.unwrap().len(), 1);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(StoreError::Corrupt("x".into()).kind(), "store.corrupt");
    }
}
