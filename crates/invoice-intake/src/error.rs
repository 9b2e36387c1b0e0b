use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error("Analysis job not found: {0}")]
    NotFound(String),

    #[error("Job {0} has expired")]
    Expired(String),

    #[error("Job {job_id} is {actual}, expected {expected}")]
    InvalidState {
        job_id: String,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Illegal transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job already exists: {0}")]
    Duplicate(String),

    #[error("Job store backend failed: {0}")]
    Backend(String),
}

impl From<crate::db::DatabaseError> for JobError {
    fn from(e: crate::db::DatabaseError) -> Self {
        JobError::Backend(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid artifact name: {0}")]
    InvalidName(String),
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Document has no pages")]
    NoPages,

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("Analysis task aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, IntakeError>;
