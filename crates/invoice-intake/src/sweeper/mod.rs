//! Expiration sweeper: moves stale jobs to `expired`, deletes their
//! artifacts, purges old finished records and removes orphaned files.

pub mod scheduler;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::JobError;
use crate::job::{AnalysisJob, JobStatus, JobStore, JobUpdate};
use crate::storage::{ArtifactCleanup, ArtifactStore};

pub use scheduler::SweepScheduler;

/// Files younger than this are never treated as orphans; an analysis may
/// still be writing them before its job record exists.
pub const DEFAULT_ORPHAN_GRACE_SECONDS: i64 = 600;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub jobs_expired: u64,
    pub files_deleted: u64,
    pub jobs_purged: u64,
    pub errors: Vec<String>,
}

impl SweepReport {
    fn absorb(&mut self, cleanup: ArtifactCleanup) {
        self.files_deleted += cleanup.files_deleted;
        self.errors.extend(cleanup.errors);
    }
}

pub struct Sweeper {
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    retention: Duration,
    orphan_grace: Duration,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            artifacts,
            retention,
            orphan_grace: Duration::seconds(DEFAULT_ORPHAN_GRACE_SECONDS),
        }
    }

    pub fn with_orphan_grace(mut self, grace: Duration) -> Self {
        self.orphan_grace = grace;
        self
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        match self.store.unfinished() {
            Ok(jobs) => {
                for job in jobs.iter().filter(|j| j.is_past_ttl(now)) {
                    match self
                        .store
                        .compare_and_set(&job.id, job.status, JobUpdate::expired())
                    {
                        Ok(_) => {
                            log::info!("Expired job {} (was {})", job.id, job.status);
                            report.jobs_expired += 1;
                        }
                        // Lost to a concurrent commit or reservation; not ours to touch.
                        Err(JobError::InvalidState { .. }) | Err(JobError::NotFound(_)) => {}
                        Err(e) => report.errors.push(format!("Failed to expire {}: {}", job.id, e)),
                    }
                }
            }
            Err(e) => report.errors.push(format!("Failed to list jobs: {}", e)),
        }

        let jobs = match self.store.all() {
            Ok(jobs) => jobs,
            Err(e) => {
                report.errors.push(format!("Failed to list jobs: {}", e));
                return report;
            }
        };
        let with_files = self.artifacts.job_ids();

        for job in &jobs {
            if self.is_purgeable(job, now) {
                report.absorb(self.artifacts.remove_job_artifacts(&job.id));
                match self.store.delete(&job.id) {
                    Ok(true) => report.jobs_purged += 1,
                    Ok(false) => {}
                    Err(e) => report.errors.push(format!("Failed to purge {}: {}", job.id, e)),
                }
            } else if job.effective_status(now) == JobStatus::Expired && with_files.contains(&job.id) {
                report.absorb(self.artifacts.remove_job_artifacts(&job.id));
            }
        }

        if report.jobs_expired > 0 || report.files_deleted > 0 || report.jobs_purged > 0 {
            log::info!(
                "Sweep: {} expired, {} files deleted, {} purged",
                report.jobs_expired,
                report.files_deleted,
                report.jobs_purged
            );
        }
        for error in &report.errors {
            log::warn!("Sweep error: {}", error);
        }
        report
    }

    fn is_purgeable(&self, job: &AnalysisJob, now: DateTime<Utc>) -> bool {
        if !job.status.is_terminal() {
            return false;
        }
        let finished = job.completed_at.unwrap_or(job.expires_at);
        now - finished > self.retention
    }

    /// Deletes artifacts of jobs the store no longer knows about.
    pub fn remove_orphans(&self) -> ArtifactCleanup {
        self.remove_orphans_at(Utc::now())
    }

    pub fn remove_orphans_at(&self, now: DateTime<Utc>) -> ArtifactCleanup {
        let mut cleanup = ArtifactCleanup::default();
        let known: HashSet<String> = match self.store.all() {
            Ok(jobs) => jobs.into_iter().map(|j| j.id).collect(),
            Err(e) => {
                cleanup.errors.push(format!("Failed to list jobs: {}", e));
                return cleanup;
            }
        };

        for job_id in self.artifacts.job_ids() {
            if known.contains(&job_id) {
                continue;
            }
            let settled = self
                .artifacts
                .last_modified(&job_id)
                .map_or(true, |modified| now - modified > self.orphan_grace);
            if settled {
                log::info!("Removing orphaned artifacts of {}", job_id);
                cleanup.merge(self.artifacts.remove_job_artifacts(&job_id));
            }
        }
        cleanup
    }

    /// Deletes every job record and every artifact, whatever its state.
    pub fn force(&self) -> SweepReport {
        let mut report = SweepReport::default();
        match self.store.all() {
            Ok(jobs) => {
                for job in jobs {
                    match self.store.delete(&job.id) {
                        Ok(true) => report.jobs_purged += 1,
                        Ok(false) => {}
                        Err(e) => report.errors.push(format!("Failed to delete {}: {}", job.id, e)),
                    }
                }
            }
            Err(e) => report.errors.push(format!("Failed to list jobs: {}", e)),
        }
        for job_id in self.artifacts.job_ids() {
            report.absorb(self.artifacts.remove_job_artifacts(&job_id));
        }
        log::warn!(
            "Forced cleanup removed {} jobs and {} files",
            report.jobs_purged,
            report.files_deleted
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::model::fixtures::job;
    use crate::job::{MemoryJobStore, Pipeline, ResultRef};
    use crate::storage::FsArtifactStore;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<MemoryJobStore>,
        artifacts: Arc<FsArtifactStore>,
        sweeper: Sweeper,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryJobStore::new());
        let artifacts = Arc::new(FsArtifactStore::new(dir.path()));
        let sweeper = Sweeper::new(store.clone(), artifacts.clone(), Duration::days(1))
            .with_orphan_grace(Duration::zero());
        Fixture {
            _dir: dir,
            store,
            artifacts,
            sweeper,
        }
    }

    fn add_job(f: &Fixture, id: &str, status: JobStatus, ttl: Duration) {
        f.store.create(job(id, status, ttl)).unwrap();
        f.artifacts.store_original(id, Some("pdf"), b"pdf").unwrap();
        f.artifacts.store_page(id, 1, b"png").unwrap();
    }

    #[test]
    fn test_sweep_expires_stale_jobs_and_deletes_files() {
        let f = setup();
        add_job(&f, "stale", JobStatus::Analyzed, Duration::hours(-1));
        add_job(&f, "stuck", JobStatus::Processing, Duration::hours(-1));
        add_job(&f, "fresh", JobStatus::Analyzed, Duration::hours(1));

        let report = f.sweeper.sweep();
        assert_eq!(report.jobs_expired, 2);
        assert_eq!(report.files_deleted, 4);
        assert!(report.errors.is_empty());
        assert_eq!(f.store.get("stale").unwrap().status, JobStatus::Expired);
        assert_eq!(f.store.get("fresh").unwrap().status, JobStatus::Analyzed);
        assert_eq!(f.artifacts.page_paths("fresh").len(), 1);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let f = setup();
        add_job(&f, "stale", JobStatus::Analyzed, Duration::hours(-1));
        f.sweeper.sweep();
        let second = f.sweeper.sweep();
        assert_eq!(second, SweepReport::default());
    }

    #[test]
    fn test_sweep_leaves_completed_jobs() {
        let f = setup();
        add_job(&f, "done", JobStatus::Processing, Duration::hours(1));
        f.store
            .compare_and_set(
                "done",
                JobStatus::Processing,
                JobUpdate::completed(Pipeline::Local, ResultRef::Invoice(1)),
            )
            .unwrap();

        let report = f.sweeper.sweep_at(Utc::now() + Duration::hours(2));
        assert_eq!(report.jobs_expired, 0);
        assert_eq!(report.files_deleted, 0);
        assert_eq!(f.store.get("done").unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_sweep_deletes_files_of_stale_failed_jobs() {
        let f = setup();
        add_job(&f, "broken", JobStatus::Failed, Duration::hours(-1));

        let report = f.sweeper.sweep();
        assert_eq!(report.jobs_expired, 0);
        assert_eq!(report.files_deleted, 2);
        assert_eq!(f.store.get("broken").unwrap().status, JobStatus::Expired);
    }

    #[test]
    fn test_sweep_purges_after_retention() {
        let f = setup();
        add_job(&f, "old", JobStatus::Analyzed, Duration::hours(-1));
        f.sweeper.sweep();

        let report = f.sweeper.sweep_at(Utc::now() + Duration::days(2));
        assert_eq!(report.jobs_purged, 1);
        assert!(matches!(f.store.get("old"), Err(JobError::NotFound(_))));
    }

    #[test]
    fn test_remove_orphans() {
        let f = setup();
        add_job(&f, "known", JobStatus::Analyzed, Duration::hours(1));
        f.artifacts.store_page("orphan", 1, b"png").unwrap();

        let cleanup = f.sweeper.remove_orphans();
        assert_eq!(cleanup.files_deleted, 1);
        assert_eq!(f.artifacts.page_paths("known").len(), 1);
    }

    #[test]
    fn test_recent_orphans_survive_grace() {
        let f = setup();
        f.artifacts.store_page("in-flight", 1, b"png").unwrap();
        let sweeper = Sweeper::new(f.store.clone(), f.artifacts.clone(), Duration::days(1));

        assert_eq!(sweeper.remove_orphans().files_deleted, 0);
        assert_eq!(f.artifacts.page_paths("in-flight").len(), 1);
    }

    #[test]
    fn test_force_removes_everything() {
        let f = setup();
        add_job(&f, "a", JobStatus::Analyzed, Duration::hours(1));
        add_job(&f, "b", JobStatus::Processing, Duration::hours(1));

        let report = f.sweeper.force();
        assert_eq!(report.jobs_purged, 2);
        assert_eq!(report.files_deleted, 4);
        assert!(f.store.is_empty());
        assert_eq!(f.artifacts.stats().total_files, 0);
    }
}
