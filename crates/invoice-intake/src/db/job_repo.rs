//! Analysis job repository: the `analysis_jobs` table behind [`JobStore`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};
use crate::error::JobError;
use crate::job::{
    check_transition, AnalysisJob, JobStatus, JobStore, JobUpdate, OcrCache, Pipeline,
    QualityClass, ResultRef,
};

const COLUMNS: &str = "id, status, original_filename, file_extension, mime_type, page_count,
    confidence_score, is_handwritten, is_low_quality, quality_classification, quality_details,
    suggested_pipeline, ocr_cache, created_at, expires_at, completed_at, result_kind, result_id,
    processing_method, processing_error";

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    status: String,
    original_filename: String,
    file_extension: Option<String>,
    mime_type: Option<String>,
    page_count: u32,
    confidence_score: f64,
    is_handwritten: bool,
    is_low_quality: bool,
    quality_classification: String,
    quality_details: Option<String>,
    suggested_pipeline: String,
    ocr_cache: Option<String>,
    created_at: String,
    expires_at: String,
    completed_at: Option<String>,
    result_kind: Option<String>,
    result_id: Option<i64>,
    processing_method: Option<String>,
    processing_error: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            original_filename: row.get("original_filename")?,
            file_extension: row.get("file_extension")?,
            mime_type: row.get("mime_type")?,
            page_count: row.get("page_count")?,
            confidence_score: row.get("confidence_score")?,
            is_handwritten: row.get("is_handwritten")?,
            is_low_quality: row.get("is_low_quality")?,
            quality_classification: row.get("quality_classification")?,
            quality_details: row.get("quality_details")?,
            suggested_pipeline: row.get("suggested_pipeline")?,
            ocr_cache: row.get("ocr_cache")?,
            created_at: row.get("created_at")?,
            expires_at: row.get("expires_at")?,
            completed_at: row.get("completed_at")?,
            result_kind: row.get("result_kind")?,
            result_id: row.get("result_id")?,
            processing_method: row.get("processing_method")?,
            processing_error: row.get("processing_error")?,
        })
    }

    fn from_job(job: &AnalysisJob) -> Result<Self, DatabaseError> {
        let (result_kind, result_id) = match job.result_ref {
            Some(ResultRef::Invoice(id)) => (Some("invoice".to_string()), Some(id)),
            Some(ResultRef::Document(id)) => (Some("document".to_string()), Some(id)),
            Some(ResultRef::Unsaved) => (Some("unsaved".to_string()), None),
            None => (None, None),
        };
        let ocr_cache = job
            .ocr_text_cache
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Json {
                column: "ocr_cache",
                source: e,
            })?;
        let quality_details =
            serde_json::to_string(&job.quality_details).map_err(|e| DatabaseError::Json {
                column: "quality_details",
                source: e,
            })?;

        Ok(Self {
            id: job.id.clone(),
            status: job.status.as_str().to_string(),
            original_filename: job.original_filename.clone(),
            file_extension: job.file_extension.clone(),
            mime_type: job.mime_type.clone(),
            page_count: job.page_count,
            confidence_score: job.confidence_score,
            is_handwritten: job.is_handwritten,
            is_low_quality: job.is_low_quality,
            quality_classification: job.quality_classification.as_str().to_string(),
            quality_details: Some(quality_details),
            suggested_pipeline: job.suggested_pipeline.as_str().to_string(),
            ocr_cache,
            created_at: job.created_at.to_rfc3339(),
            expires_at: job.expires_at.to_rfc3339(),
            completed_at: job.completed_at.map(|dt| dt.to_rfc3339()),
            result_kind,
            result_id,
            processing_method: job.processing_method.map(|p| p.as_str().to_string()),
            processing_error: job.processing_error.clone(),
        })
    }

    fn into_job(self) -> Result<AnalysisJob, DatabaseError> {
        let status = JobStatus::parse(&self.status).ok_or(DatabaseError::InvalidValue {
            column: "status",
            value: self.status.clone(),
        })?;
        let suggested_pipeline =
            Pipeline::parse(&self.suggested_pipeline).ok_or(DatabaseError::InvalidValue {
                column: "suggested_pipeline",
                value: self.suggested_pipeline.clone(),
            })?;
        let processing_method = match self.processing_method.as_deref() {
            Some(s) => Some(Pipeline::parse(s).ok_or(DatabaseError::InvalidValue {
                column: "processing_method",
                value: s.to_string(),
            })?),
            None => None,
        };
        let result_ref = match (self.result_kind.as_deref(), self.result_id) {
            (Some("invoice"), Some(id)) => Some(ResultRef::Invoice(id)),
            (Some("document"), Some(id)) => Some(ResultRef::Document(id)),
            (Some("unsaved"), _) => Some(ResultRef::Unsaved),
            (None, _) => None,
            (Some(other), _) => {
                return Err(DatabaseError::InvalidValue {
                    column: "result_kind",
                    value: other.to_string(),
                })
            }
        };
        let ocr_text_cache = self
            .ocr_cache
            .as_deref()
            .map(serde_json::from_str::<OcrCache>)
            .transpose()
            .map_err(|e| DatabaseError::Json {
                column: "ocr_cache",
                source: e,
            })?;
        let quality_details = match self.quality_details.as_deref() {
            Some(s) => serde_json::from_str(s).map_err(|e| DatabaseError::Json {
                column: "quality_details",
                source: e,
            })?,
            None => serde_json::Value::Null,
        };

        Ok(AnalysisJob {
            id: self.id,
            status,
            original_filename: self.original_filename,
            file_extension: self.file_extension,
            mime_type: self.mime_type,
            page_count: self.page_count,
            confidence_score: self.confidence_score,
            is_handwritten: self.is_handwritten,
            is_low_quality: self.is_low_quality,
            quality_classification: QualityClass::parse(&self.quality_classification),
            quality_details,
            suggested_pipeline,
            ocr_text_cache,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            expires_at: parse_timestamp("expires_at", &self.expires_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|s| parse_timestamp("completed_at", s))
                .transpose()?,
            result_ref,
            processing_method,
            processing_error: self.processing_error,
        })
    }
}

fn parse_timestamp(column: &'static str, s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidValue {
            column,
            value: s.to_string(),
        })
}

fn insert(conn: &Connection, row: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO analysis_jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
             ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            COLUMNS
        ),
        params![
            row.id,
            row.status,
            row.original_filename,
            row.file_extension,
            row.mime_type,
            row.page_count,
            row.confidence_score,
            row.is_handwritten,
            row.is_low_quality,
            row.quality_classification,
            row.quality_details,
            row.suggested_pipeline,
            row.ocr_cache,
            row.created_at,
            row.expires_at,
            row.completed_at,
            row.result_kind,
            row.result_id,
            row.processing_method,
            row.processing_error,
        ],
    )?;
    Ok(())
}

fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM analysis_jobs WHERE id = ?1", COLUMNS),
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

fn query_where(conn: &Connection, clause: &str) -> Result<Vec<JobRow>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM analysis_jobs {} ORDER BY created_at ASC",
        COLUMNS, clause
    ))?;
    let rows = stmt
        .query_map([], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Conditional update: only applies while the stored status still equals
/// `expected`. Returns the number of rows changed.
fn update_if_status(
    conn: &Connection,
    row: &JobRow,
    expected: JobStatus,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE analysis_jobs SET status = ?3, ocr_cache = ?4, completed_at = ?5,
         result_kind = ?6, result_id = ?7, processing_method = ?8, processing_error = ?9
         WHERE id = ?1 AND status = ?2",
        params![
            row.id,
            expected.as_str(),
            row.status,
            row.ocr_cache,
            row.completed_at,
            row.result_kind,
            row.result_id,
            row.processing_method,
            row.processing_error,
        ],
    )?;
    Ok(changed)
}

/// SQLite-backed job store. Survives restarts, unlike [`crate::job::MemoryJobStore`].
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn load(&self, clause: &str) -> Result<Vec<AnalysisJob>, JobError> {
        let rows = self.db.with_conn(|conn| query_where(conn, clause))?;
        rows.into_iter()
            .map(|r| r.into_job().map_err(JobError::from))
            .collect()
    }
}

impl JobStore for SqliteJobStore {
    fn create(&self, job: AnalysisJob) -> Result<String, JobError> {
        let row = JobRow::from_job(&job)?;
        self.db.with_conn(|conn| {
            if find_by_id(conn, &row.id)?.is_some() {
                return Ok(false);
            }
            insert(conn, &row)?;
            Ok(true)
        })?
        .then_some(job.id.clone())
        .ok_or(JobError::Duplicate(job.id))
    }

    fn get(&self, job_id: &str) -> Result<AnalysisJob, JobError> {
        let row = self
            .db
            .with_conn(|conn| find_by_id(conn, job_id))?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        Ok(row.into_job()?.observed_at(Utc::now()))
    }

    fn compare_and_set(
        &self,
        job_id: &str,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<AnalysisJob, JobError> {
        let now = Utc::now();
        let outcome = self.db.with_conn(|conn| {
            let Some(row) = find_by_id(conn, job_id)? else {
                return Ok(Err(JobError::NotFound(job_id.to_string())));
            };
            let mut job = row.into_job()?;
            if let Err(e) = check_transition(&job, expected, update.status, now) {
                return Ok(Err(e));
            }
            update.apply(&mut job, now);
            let changed = update_if_status(conn, &JobRow::from_job(&job)?, expected)?;
            if changed == 0 {
                return Ok(Err(JobError::InvalidState {
                    job_id: job_id.to_string(),
                    expected,
                    actual: JobStatus::Expired,
                }));
            }
            Ok(Ok(job))
        })?;

        if outcome.is_ok() {
            log::debug!("Job {}: {} -> {}", job_id, expected, update.status);
        }
        outcome
    }

    fn delete(&self, job_id: &str) -> Result<bool, JobError> {
        let changed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM analysis_jobs WHERE id = ?1", params![job_id])?)
        })?;
        Ok(changed > 0)
    }

    fn unfinished(&self) -> Result<Vec<AnalysisJob>, JobError> {
        self.load("WHERE status IN ('analyzed', 'processing')")
    }

    fn all(&self) -> Result<Vec<AnalysisJob>, JobError> {
        self.load("")
    }
}
