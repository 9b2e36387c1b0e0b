//! Two-phase invoice intake.
//!
//! `analyze` stores an upload, measures its quality and creates a job with a
//! suggested extraction pipeline. `process` picks a pipeline (possibly asking
//! the caller to confirm), runs the extractor, persists the result and
//! completes the job. Jobs expire after a TTL and are swept in the background.

pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod storage;
pub mod sweeper;

pub use analysis::{QualityAnalyzer, QualityReport};
pub use config::{load_config, Config};
pub use error::{AnalysisError, ConfigError, IntakeError, JobError, Result, StorageError};
pub use job::{AnalysisJob, JobStatus, JobStore, Pipeline, PipelinePreference, ResultRef};
pub use logging::init_logging;
pub use pipeline::{
    CredentialCheck, CredentialStatus, ExtractionError, Extractor, InvoiceData, ProcessErrorKind,
    ResultPersister,
};
pub use service::{
    AnalysisSummary, CleanupReport, IntakeCollaborators, IntakeService, IntakeSettings,
    ProcessRequest, ProcessResult, StatusSnapshot,
};
