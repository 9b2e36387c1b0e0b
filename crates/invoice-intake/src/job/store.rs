//! Job store abstraction and the in-memory implementation.
//!
//! Every mutation goes through [`JobStore::compare_and_set`], which is the
//! only thing standing between two concurrent `process` calls on one job.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::model::{AnalysisJob, JobStatus, Pipeline, ResultRef};
use crate::error::JobError;

/// Field changes that accompany a status transition.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub processing_method: Option<Pipeline>,
    pub result_ref: Option<ResultRef>,
    pub processing_error: Option<String>,
}

impl JobUpdate {
    /// Reservation: `analyzed -> processing`.
    pub fn processing(method: Pipeline) -> Self {
        Self {
            status: JobStatus::Processing,
            processing_method: Some(method),
            result_ref: None,
            processing_error: None,
        }
    }

    pub fn completed(method: Pipeline, result: ResultRef) -> Self {
        Self {
            status: JobStatus::Completed,
            processing_method: Some(method),
            result_ref: Some(result),
            processing_error: None,
        }
    }

    pub fn failed(method: Pipeline, error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            processing_method: Some(method),
            result_ref: None,
            processing_error: Some(error.into()),
        }
    }

    pub fn expired() -> Self {
        Self {
            status: JobStatus::Expired,
            processing_method: None,
            result_ref: None,
            processing_error: None,
        }
    }

    /// Applies this update to `job`. Callers have already validated the edge.
    pub fn apply(&self, job: &mut AnalysisJob, now: DateTime<Utc>) {
        job.status = self.status;
        if let Some(method) = self.processing_method {
            job.processing_method = Some(method);
        }
        if self.processing_error.is_some() {
            job.processing_error = self.processing_error.clone();
        }
        // result_ref exists iff the job is completed
        job.result_ref = if self.status == JobStatus::Completed {
            self.result_ref
        } else {
            None
        };
        if matches!(self.status, JobStatus::Completed | JobStatus::Failed) {
            job.completed_at = Some(now);
        }
        if self.status.is_terminal() {
            job.ocr_text_cache = None;
        }
    }
}

/// Checks a requested CAS against the stored job. Shared by all backends.
pub fn check_transition(
    job: &AnalysisJob,
    expected: JobStatus,
    next: JobStatus,
    now: DateTime<Utc>,
) -> Result<(), JobError> {
    if job.status != expected {
        return Err(JobError::InvalidState {
            job_id: job.id.clone(),
            expected,
            actual: job.effective_status(now),
        });
    }
    if !expected.can_transition_to(next) {
        return Err(JobError::InvalidTransition {
            from: expected,
            to: next,
        });
    }
    // A late reservation or commit loses to the TTL.
    if next != JobStatus::Expired && job.is_past_ttl(now) {
        return Err(JobError::Expired(job.id.clone()));
    }
    Ok(())
}

/// Keyed repository of analysis jobs.
pub trait JobStore: Send + Sync {
    /// Inserts a new job and returns its id.
    fn create(&self, job: AnalysisJob) -> Result<String, JobError>;

    /// Returns the job with lazy expiration applied to its status.
    fn get(&self, job_id: &str) -> Result<AnalysisJob, JobError>;

    /// Atomically moves a job from `expected` to `update.status`.
    fn compare_and_set(
        &self,
        job_id: &str,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<AnalysisJob, JobError>;

    /// Removes a job. Returns false if it did not exist.
    fn delete(&self, job_id: &str) -> Result<bool, JobError>;

    /// Stored `analyzed` and `processing` jobs, without lazy coercion.
    fn unfinished(&self) -> Result<Vec<AnalysisJob>, JobError>;

    /// Every stored job, without lazy coercion.
    fn all(&self) -> Result<Vec<AnalysisJob>, JobError>;
}

/// Ephemeral job store guarded by a single `RwLock`.
///
/// The write lock is held only for the duration of one CAS; extraction
/// never runs under it.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, AnalysisJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, AnalysisJob>> {
        match self.jobs.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, AnalysisJob>> {
        match self.jobs.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, job: AnalysisJob) -> Result<String, JobError> {
        let mut jobs = self.write();
        if jobs.contains_key(&job.id) {
            return Err(JobError::Duplicate(job.id));
        }
        let id = job.id.clone();
        jobs.insert(id.clone(), job);
        log::debug!("Created analysis job {}", id);
        Ok(id)
    }

    fn get(&self, job_id: &str) -> Result<AnalysisJob, JobError> {
        self.read()
            .get(job_id)
            .cloned()
            .map(|job| job.observed_at(Utc::now()))
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    fn compare_and_set(
        &self,
        job_id: &str,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<AnalysisJob, JobError> {
        let now = Utc::now();
        let mut jobs = self.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

        check_transition(job, expected, update.status, now)?;
        update.apply(job, now);

        log::debug!("Job {}: {} -> {}", job_id, expected, update.status);
        Ok(job.clone())
    }

    fn delete(&self, job_id: &str) -> Result<bool, JobError> {
        Ok(self.write().remove(job_id).is_some())
    }

    fn unfinished(&self) -> Result<Vec<AnalysisJob>, JobError> {
        Ok(self
            .read()
            .values()
            .filter(|j| !j.status.is_terminal())
            .cloned()
            .collect())
    }

    fn all(&self) -> Result<Vec<AnalysisJob>, JobError> {
        Ok(self.read().values().cloned().collect())
    }
}
