use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::types::{AnalysisSummary, CleanupReport, ProcessRequest, ProcessResult, StatusSnapshot};
use crate::analysis::{QualityAnalyzer, QualityReport};
use crate::config::Config;
use crate::db::{Database, InvoiceStore, SqliteJobStore};
use crate::error::{AnalysisError, IntakeError, JobError, Result};
use crate::job::{
    AnalysisJob, JobStatus, JobStore, JobUpdate, MemoryJobStore, Pipeline, PipelinePreference,
    ResultRef,
};
use crate::pipeline::{
    decide_with_threshold, suggest, CredentialCheck, ExtractionExecutor, Extractor,
    PersistSource, ProcessErrorKind, QualitySignals, ResultPersister,
};
use crate::sanitize;
use crate::secrets::EnvCredentialCheck;
use crate::storage::{ArtifactCleanup, ArtifactStore, FsArtifactStore, TempStats};
use crate::sweeper::{SweepScheduler, Sweeper};

/// Tunables of the intake service.
#[derive(Debug, Clone)]
pub struct IntakeSettings {
    pub ttl: chrono::Duration,
    pub retention: chrono::Duration,
    pub sweep_interval: Duration,
    pub quality_threshold: f64,
    pub extraction_timeout: Duration,
    pub max_upload_bytes: u64,
    pub console_url: String,
    pub default_preference: PipelinePreference,
}

impl IntakeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: chrono::Duration::seconds(config.jobs.ttl_seconds as i64),
            retention: chrono::Duration::seconds(config.jobs.retention_seconds as i64),
            sweep_interval: Duration::from_secs(config.jobs.sweep_interval_seconds),
            quality_threshold: config.pipeline.quality_threshold,
            extraction_timeout: Duration::from_secs(config.pipeline.extraction_timeout_seconds),
            max_upload_bytes: config.storage.max_upload_bytes,
            console_url: config.cloud.console_url.clone(),
            default_preference: config.pipeline.default_preference,
        }
    }
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Everything the service talks to.
pub struct IntakeCollaborators {
    pub analyzer: Arc<dyn QualityAnalyzer>,
    pub local: Arc<dyn Extractor>,
    pub cloud: Arc<dyn Extractor>,
    pub credentials: Arc<dyn CredentialCheck>,
    pub persister: Arc<dyn ResultPersister>,
    pub store: Arc<dyn JobStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
}

/// The two-phase intake: `analyze` creates a job, `process` extracts it.
pub struct IntakeService {
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    analyzer: Arc<dyn QualityAnalyzer>,
    credentials: Arc<dyn CredentialCheck>,
    persister: Arc<dyn ResultPersister>,
    executor: ExtractionExecutor,
    sweeper: Arc<Sweeper>,
    settings: IntakeSettings,
}

/// Only PDFs and images are accepted.
fn guess_upload_type(filename: &str) -> Option<(Option<String>, String)> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let mime = mime_guess::from_path(filename).first()?;
    let accepted =
        mime.type_() == mime_guess::mime::IMAGE || mime.essence_str() == "application/pdf";
    accepted.then(|| (extension, mime.essence_str().to_string()))
}

impl IntakeService {
    /// Production constructor: SQLite persistence, filesystem artifacts and
    /// environment credentials, all from config.
    pub fn from_config(
        config: &Config,
        analyzer: Arc<dyn QualityAnalyzer>,
        local: Arc<dyn Extractor>,
        cloud: Arc<dyn Extractor>,
    ) -> Result<Self> {
        let db = Database::open(&config.storage.database_path())?;
        let store: Arc<dyn JobStore> = if config.jobs.persistent {
            Arc::new(SqliteJobStore::new(db.clone()))
        } else {
            Arc::new(MemoryJobStore::new())
        };

        let collaborators = IntakeCollaborators {
            analyzer,
            local,
            cloud,
            credentials: Arc::new(EnvCredentialCheck::from_config(&config.cloud)),
            persister: Arc::new(InvoiceStore::new(db)),
            store,
            artifacts: Arc::new(FsArtifactStore::new(config.storage.temp_directory())),
        };
        Ok(Self::new(collaborators, IntakeSettings::from_config(config)))
    }

    pub fn new(collaborators: IntakeCollaborators, settings: IntakeSettings) -> Self {
        let executor = ExtractionExecutor::new(
            collaborators.local,
            collaborators.cloud,
            Arc::clone(&collaborators.credentials),
            settings.extraction_timeout,
        );
        let sweeper = Arc::new(Sweeper::new(
            Arc::clone(&collaborators.store),
            Arc::clone(&collaborators.artifacts),
            settings.retention,
        ));

        Self {
            store: collaborators.store,
            artifacts: collaborators.artifacts,
            analyzer: collaborators.analyzer,
            credentials: collaborators.credentials,
            persister: collaborators.persister,
            executor,
            sweeper,
            settings,
        }
    }

    pub fn settings(&self) -> &IntakeSettings {
        &self.settings
    }

    /// A request carrying the configured default preference.
    pub fn request(&self, job_id: impl Into<String>) -> ProcessRequest {
        ProcessRequest::new(job_id).with_preference(self.settings.default_preference)
    }

    /// Background sweeper at the configured interval. Not started.
    pub fn sweep_scheduler(&self) -> SweepScheduler {
        SweepScheduler::new(Arc::clone(&self.sweeper), self.settings.sweep_interval)
    }

    /// Phase one: store the upload, run the quality analyzer and create an
    /// `analyzed` job.
    pub async fn analyze(&self, bytes: Vec<u8>, filename: &str) -> Result<AnalysisSummary> {
        if bytes.is_empty() {
            return Err(IntakeError::InvalidUpload("file is empty".to_string()));
        }
        if bytes.len() as u64 > self.settings.max_upload_bytes {
            return Err(IntakeError::InvalidUpload(format!(
                "file is {} bytes, the limit is {}",
                bytes.len(),
                self.settings.max_upload_bytes
            )));
        }
        let (extension, mime_type) = guess_upload_type(filename).ok_or_else(|| {
            IntakeError::InvalidUpload(format!(
                "unsupported file type: {}",
                sanitize::redact_path(Path::new(filename))
            ))
        })?;

        let job_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "analyze",
            job_id = %job_id,
            filename = %sanitize::redact_path(Path::new(filename)),
            size = bytes.len(),
        );

        async {
            let outcome = self
                .run_analysis(&job_id, bytes, filename, extension, mime_type)
                .await;
            if outcome.is_err() {
                let cleanup = self.artifacts.remove_job_artifacts(&job_id);
                debug!(files = cleanup.files_deleted, "Removed partial artifacts");
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_analysis(
        &self,
        job_id: &str,
        bytes: Vec<u8>,
        filename: &str,
        extension: Option<String>,
        mime_type: String,
    ) -> Result<AnalysisSummary> {
        self.artifacts
            .store_original(job_id, extension.as_deref(), &bytes)?;

        let analyzer = Arc::clone(&self.analyzer);
        let name = filename.to_string();
        let report: QualityReport =
            tokio::task::spawn_blocking(move || analyzer.analyze(&bytes, &name))
                .await
                .map_err(|e| AnalysisError::Aborted(e.to_string()))??;

        for (index, png) in report.pages.iter().enumerate() {
            self.artifacts.store_page(job_id, index as u32 + 1, png)?;
        }

        let confidence_score = report.clamped_confidence();
        let suggested_pipeline = suggest(
            QualitySignals {
                confidence_score,
                is_handwritten: report.is_handwritten,
            },
            self.settings.quality_threshold,
        );

        let now = Utc::now();
        let job = AnalysisJob {
            id: job_id.to_string(),
            status: JobStatus::Analyzed,
            original_filename: filename.to_string(),
            file_extension: extension,
            mime_type: Some(mime_type),
            page_count: report.page_count(),
            confidence_score,
            is_handwritten: report.is_handwritten,
            is_low_quality: report.is_low_quality,
            quality_classification: report.classification,
            quality_details: report.details,
            suggested_pipeline,
            ocr_text_cache: Some(report.ocr),
            created_at: now,
            expires_at: now + self.settings.ttl,
            completed_at: None,
            result_ref: None,
            processing_method: None,
            processing_error: None,
        };
        self.store.create(job.clone())?;

        let credentials = self.credentials.status();
        info!(
            pages = job.page_count,
            confidence = job.confidence_score,
            suggested = %suggested_pipeline,
            "Document analyzed"
        );

        Ok(AnalysisSummary {
            job_id: job.id.clone(),
            original_filename: job.original_filename.clone(),
            page_count: job.page_count,
            confidence_score: job.confidence_score,
            is_handwritten: job.is_handwritten,
            is_low_quality: job.is_low_quality,
            suggested_pipeline,
            quality_classification: job.quality_classification,
            preview_text: job.preview_text(),
            word_count: job.word_count(),
            quality_details: job.quality_details,
            expires_at: job.expires_at,
            cloud_available: credentials.valid,
            cloud_configured: credentials.configured,
        })
    }

    /// Phase two: select a pipeline, reserve the job, extract, persist and
    /// commit. Never fails; every outcome is described by the result.
    pub async fn process(&self, request: ProcessRequest) -> ProcessResult {
        let span = info_span!("process", job_id = %request.job_id);
        self.run_process(request).instrument(span).await
    }

    async fn run_process(&self, request: ProcessRequest) -> ProcessResult {
        let job = match self.store.get(&request.job_id) {
            Ok(job) => job,
            Err(e) => return ProcessResult::from_job_error(&e),
        };

        match job.status {
            JobStatus::Analyzed => {}
            JobStatus::Completed => {
                return ProcessResult {
                    result_ref: job.result_ref,
                    processing_method: job.processing_method,
                    ..ProcessResult::failure(
                        ProcessErrorKind::AlreadyProcessed,
                        "Job has already been processed",
                    )
                };
            }
            JobStatus::Expired => {
                return ProcessResult::failure(
                    ProcessErrorKind::Expired,
                    "Job has expired, please upload the document again",
                );
            }
            JobStatus::Processing => {
                return ProcessResult::failure(
                    ProcessErrorKind::InvalidState,
                    "Job is already being processed",
                );
            }
            JobStatus::Failed => {
                return ProcessResult {
                    processing_method: job.processing_method,
                    ..ProcessResult::failure(
                        ProcessErrorKind::InvalidState,
                        "Job has already failed, please upload the document again",
                    )
                };
            }
        }

        let credentials = self.credentials.status();
        let pipeline = match request.pipeline {
            Some(explicit) => explicit,
            None => {
                let decision = decide_with_threshold(
                    QualitySignals::from(&job),
                    request.user_preference,
                    credentials.valid,
                    self.settings.quality_threshold,
                );
                if decision.requires_confirmation {
                    info!(suggested = %decision.suggested, "Awaiting pipeline confirmation");
                    return ProcessResult::needs_confirmation(decision);
                }
                decision.pipeline
            }
        };

        // Checked before reserving so the job stays processable once a key is added.
        if pipeline == Pipeline::Cloud && !credentials.valid {
            return ProcessResult {
                suggested_pipeline: Some(job.suggested_pipeline),
                ..ProcessResult::missing_credential(&self.settings.console_url)
            };
        }

        let reserved = match self.store.compare_and_set(
            &job.id,
            JobStatus::Analyzed,
            JobUpdate::processing(pipeline),
        ) {
            Ok(reserved) => reserved,
            Err(e) => {
                debug!(error = %e, "Reservation lost");
                return ProcessResult::from_job_error(&e);
            }
        };

        let pages = self.artifacts.page_paths(&reserved.id);
        let execution = self.executor.execute(&reserved, pipeline, pages).await;

        let (data, raw_response) = match (execution.extracted_data, execution.raw_response) {
            (Some(data), raw) if execution.success => (data, raw.unwrap_or_default()),
            _ => {
                let error = execution
                    .error
                    .unwrap_or_else(|| "Extraction failed".to_string());
                self.commit_failure(&reserved.id, pipeline, &error);
                return ProcessResult {
                    processing_method: Some(pipeline),
                    requires_api_key: execution.requires_api_key,
                    console_url: execution
                        .requires_api_key
                        .then(|| self.settings.console_url.clone()),
                    suggested_pipeline: Some(reserved.suggested_pipeline),
                    ..ProcessResult::failure(
                        execution
                            .error_kind
                            .unwrap_or(ProcessErrorKind::ExtractionFailure),
                        error,
                    )
                };
            }
        };

        let result_ref = if request.save_to_db {
            let source = PersistSource {
                job_id: reserved.id.clone(),
                original_filename: reserved.original_filename.clone(),
                file_extension: reserved.file_extension.clone(),
            };
            match self.persister.persist(&data, &raw_response, &source) {
                Ok(result_ref) => result_ref,
                Err(e) => {
                    warn!(error = %e, "Failed to persist extraction result");
                    let error = "Failed to save the extracted data".to_string();
                    self.commit_failure(&reserved.id, pipeline, &error);
                    return ProcessResult {
                        processing_method: Some(pipeline),
                        extracted_data: Some(data),
                        ..ProcessResult::failure(ProcessErrorKind::PersistFailure, error)
                    };
                }
            }
        } else {
            ResultRef::Unsaved
        };

        match self.store.compare_and_set(
            &reserved.id,
            JobStatus::Processing,
            JobUpdate::completed(pipeline, result_ref),
        ) {
            Ok(_) => {
                info!(%pipeline, result = ?result_ref, "Job completed");
                ProcessResult {
                    success: true,
                    result_ref: Some(result_ref),
                    extracted_data: Some(data),
                    processing_method: Some(pipeline),
                    suggested_pipeline: Some(reserved.suggested_pipeline),
                    ..Default::default()
                }
            }
            Err(e) => {
                warn!(error = %e, "Commit lost, discarding persisted result");
                self.discard(&result_ref);
                ProcessResult {
                    processing_method: Some(pipeline),
                    ..ProcessResult::from_job_error(&e)
                }
            }
        }
    }

    fn commit_failure(&self, job_id: &str, pipeline: Pipeline, error: &str) {
        if let Err(e) = self.store.compare_and_set(
            job_id,
            JobStatus::Processing,
            JobUpdate::failed(pipeline, error),
        ) {
            debug!(error = %e, "Failure commit lost");
        }
    }

    fn discard(&self, result_ref: &ResultRef) {
        if *result_ref == ResultRef::Unsaved {
            return;
        }
        if let Err(e) = self.persister.discard(result_ref) {
            warn!(error = %e, result = ?result_ref, "Failed to discard orphaned result");
        }
    }

    pub fn job_status(&self, job_id: &str) -> StatusSnapshot {
        match self.store.get(job_id) {
            Ok(job) => StatusSnapshot::of(&job),
            Err(JobError::NotFound(_)) => StatusSnapshot::not_found(job_id),
            Err(e) => {
                warn!(job_id, error = %e, "Failed to read job status");
                StatusSnapshot::not_found(job_id)
            }
        }
    }

    /// Expires stale jobs, deletes their files, purges old records and
    /// removes orphaned artifacts.
    pub fn cleanup(&self) -> CleanupReport {
        let sweep = self.sweeper.sweep();
        let orphans = self.sweeper.remove_orphans();
        let mut errors = sweep.errors;
        errors.extend(orphans.errors);
        CleanupReport {
            expired_jobs_cleaned: sweep.jobs_expired,
            files_deleted: sweep.files_deleted,
            orphaned_files_deleted: orphans.files_deleted,
            jobs_purged: sweep.jobs_purged,
            errors,
        }
    }

    /// Deletes one job's artifacts once the client is done with it.
    /// Refused while the job is `analyzed` or `processing`.
    pub fn cleanup_job(&self, job_id: &str) -> std::result::Result<ArtifactCleanup, JobError> {
        match self.store.get(job_id) {
            // Pages of a job that can still be processed must stay.
            Ok(job) if !job.status.is_terminal() => Err(JobError::InvalidState {
                job_id: job_id.to_string(),
                expected: JobStatus::Completed,
                actual: job.status,
            }),
            Ok(_) | Err(JobError::NotFound(_)) => Ok(self.artifacts.remove_job_artifacts(job_id)),
            Err(e) => Err(e),
        }
    }

    /// Deletes every job and artifact regardless of state.
    pub fn force_cleanup(&self) -> CleanupReport {
        let report = self.sweeper.force();
        CleanupReport {
            files_deleted: report.files_deleted,
            jobs_purged: report.jobs_purged,
            errors: report.errors,
            ..Default::default()
        }
    }

    pub fn temp_stats(&self) -> TempStats {
        self.artifacts.stats()
    }
}
