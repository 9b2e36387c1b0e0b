use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::JobError;
use crate::job::{AnalysisJob, JobStatus, Pipeline, PipelinePreference, QualityClass, ResultRef};
use crate::pipeline::{Decision, InvoiceData, ProcessErrorKind};
use crate::sanitize;

/// Returned by `analyze`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub job_id: String,
    pub original_filename: String,
    pub page_count: u32,
    pub confidence_score: f64,
    pub is_handwritten: bool,
    pub is_low_quality: bool,
    pub suggested_pipeline: Pipeline,
    pub quality_classification: QualityClass,
    pub quality_details: serde_json::Value,
    pub preview_text: String,
    pub word_count: u64,
    pub expires_at: DateTime<Utc>,
    pub cloud_available: bool,
    pub cloud_configured: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRequest {
    pub job_id: String,
    /// Explicit pipeline. Setting it is how a client confirms a warning.
    pub pipeline: Option<Pipeline>,
    pub user_preference: PipelinePreference,
    pub save_to_db: bool,
}

impl ProcessRequest {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            pipeline: None,
            user_preference: PipelinePreference::Auto,
            save_to_db: true,
        }
    }

    pub fn with_preference(mut self, preference: PipelinePreference) -> Self {
        self.user_preference = preference;
        self
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn without_saving(mut self) -> Self {
        self.save_to_db = false;
        self
    }
}

/// Returned by `process`. Every failure is described here rather than raised.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    pub result_ref: Option<ResultRef>,
    pub extracted_data: Option<InvoiceData>,
    pub processing_method: Option<Pipeline>,
    pub error: Option<String>,
    pub error_kind: Option<ProcessErrorKind>,
    pub requires_api_key: bool,
    pub console_url: Option<String>,
    pub requires_confirmation: bool,
    pub warning: Option<String>,
    pub suggested_pipeline: Option<Pipeline>,
}

impl ProcessResult {
    pub fn failure(kind: ProcessErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            error_kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn needs_confirmation(decision: Decision) -> Self {
        Self {
            success: false,
            requires_confirmation: true,
            warning: decision.warning,
            suggested_pipeline: Some(decision.suggested),
            ..Default::default()
        }
    }

    pub fn missing_credential(console_url: &str) -> Self {
        Self {
            requires_api_key: true,
            console_url: Some(console_url.to_string()),
            processing_method: Some(Pipeline::Cloud),
            ..Self::failure(
                ProcessErrorKind::MissingCredential,
                "A valid API key is required for cloud processing",
            )
        }
    }

    /// Maps a lost CAS or lookup onto the caller-facing taxonomy.
    pub fn from_job_error(err: &JobError) -> Self {
        match err {
            JobError::NotFound(_) => Self::failure(ProcessErrorKind::NotFound, "Job not found"),
            JobError::Expired(_)
            | JobError::InvalidState {
                actual: JobStatus::Expired,
                ..
            } => Self::failure(
                ProcessErrorKind::Expired,
                "Job has expired, please upload the document again",
            ),
            JobError::InvalidState {
                actual: JobStatus::Completed,
                ..
            } => Self::failure(
                ProcessErrorKind::AlreadyProcessed,
                "Job has already been processed",
            ),
            JobError::InvalidState {
                actual: JobStatus::Processing,
                ..
            } => Self::failure(
                ProcessErrorKind::InvalidState,
                "Job is already being processed",
            ),
            other => Self::failure(
                ProcessErrorKind::InvalidState,
                sanitize::user_safe_error(&other.to_string()),
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusSnapshot {
    pub found: bool,
    pub job_id: String,
    pub status: Option<JobStatus>,
    pub is_expired: bool,
    pub can_be_processed: bool,
    pub result_ref: Option<ResultRef>,
    pub processing_method: Option<Pipeline>,
    pub processing_error: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    pub fn not_found(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            ..Default::default()
        }
    }

    /// `job` must already carry the lazily coerced status.
    pub fn of(job: &AnalysisJob) -> Self {
        Self {
            found: true,
            job_id: job.id.clone(),
            status: Some(job.status),
            is_expired: job.status == JobStatus::Expired,
            can_be_processed: job.status == JobStatus::Analyzed,
            result_ref: job.result_ref,
            processing_method: job.processing_method,
            processing_error: job.processing_error.clone(),
            created_at: Some(job.created_at),
            expires_at: Some(job.expires_at),
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub expired_jobs_cleaned: u64,
    pub files_deleted: u64,
    pub orphaned_files_deleted: u64,
    pub jobs_purged: u64,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_error_mapping() {
        let completed = JobError::InvalidState {
            job_id: "j".into(),
            expected: JobStatus::Analyzed,
            actual: JobStatus::Completed,
        };
        assert_eq!(
            ProcessResult::from_job_error(&completed).error_kind,
            Some(ProcessErrorKind::AlreadyProcessed)
        );
        assert_eq!(
            ProcessResult::from_job_error(&JobError::Expired("j".into())).error_kind,
            Some(ProcessErrorKind::Expired)
        );
        assert_eq!(
            ProcessResult::from_job_error(&JobError::NotFound("j".into())).error_kind,
            Some(ProcessErrorKind::NotFound)
        );
        let backend = ProcessResult::from_job_error(&JobError::Backend("disk full".into()));
        assert_eq!(backend.error_kind, Some(ProcessErrorKind::InvalidState));
        assert!(!backend.success);
    }

    #[test]
    fn test_missing_credential_result() {
        let result = ProcessResult::missing_credential("https://console.example/keys");
        assert!(result.requires_api_key);
        assert!(!result.success);
        assert_eq!(result.console_url.as_deref(), Some("https://console.example/keys"));
        assert_eq!(result.error_kind, Some(ProcessErrorKind::MissingCredential));
    }

    #[test]
    fn test_request_builder() {
        let req = ProcessRequest::new("job-1")
            .with_preference(PipelinePreference::Local)
            .with_pipeline(Pipeline::Local)
            .without_saving();
        assert_eq!(req.pipeline, Some(Pipeline::Local));
        assert!(!req.save_to_db);
    }
}
