use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable failure category reported by `process`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessErrorKind {
    NotFound,
    Expired,
    InvalidState,
    AlreadyProcessed,
    MissingCredential,
    ExtractionFailure,
    Timeout,
    PersistFailure,
}

impl ProcessErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessErrorKind::NotFound => "not_found",
            ProcessErrorKind::Expired => "expired",
            ProcessErrorKind::InvalidState => "invalid_state",
            ProcessErrorKind::AlreadyProcessed => "already_processed",
            ProcessErrorKind::MissingCredential => "missing_credential",
            ProcessErrorKind::ExtractionFailure => "extraction_failure",
            ProcessErrorKind::Timeout => "timeout",
            ProcessErrorKind::PersistFailure => "persist_failure",
        }
    }
}

impl std::fmt::Display for ProcessErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("No valid API key configured for the cloud pipeline")]
    MissingCredential,

    #[error("API key rejected by the provider: {0}")]
    CredentialRejected(String),

    #[error("Extraction timed out after {0} seconds")]
    Timeout(u64),

    #[error("Extractor failed: {0}")]
    Failed(String),

    #[error("Extractor returned malformed output: {0}")]
    Malformed(String),
}

impl ExtractionError {
    pub fn kind(&self) -> ProcessErrorKind {
        match self {
            ExtractionError::MissingCredential | ExtractionError::CredentialRejected(_) => {
                ProcessErrorKind::MissingCredential
            }
            ExtractionError::Timeout(_) => ProcessErrorKind::Timeout,
            ExtractionError::Failed(_) | ExtractionError::Malformed(_) => {
                ProcessErrorKind::ExtractionFailure
            }
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(
            self,
            ExtractionError::MissingCredential | ExtractionError::CredentialRejected(_)
        )
    }
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to encode extracted data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Nothing to discard for {0:?}")]
    NotDiscardable(crate::job::ResultRef),
}
