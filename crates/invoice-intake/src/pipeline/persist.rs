use super::error::PersistError;
use super::extractor::InvoiceData;
use crate::job::ResultRef;

/// Provenance of an extraction, stored alongside the result.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistSource {
    pub job_id: String,
    pub original_filename: String,
    pub file_extension: Option<String>,
}

/// Stores extracted data and hands back a reference to it.
pub trait ResultPersister: Send + Sync {
    fn persist(
        &self,
        data: &InvoiceData,
        raw_response: &str,
        source: &PersistSource,
    ) -> Result<ResultRef, PersistError>;

    /// Removes a previously persisted result whose job commit was lost.
    fn discard(&self, result: &ResultRef) -> Result<(), PersistError>;
}
