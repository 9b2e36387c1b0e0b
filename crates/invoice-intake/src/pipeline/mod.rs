pub mod error;
pub mod executor;
pub mod extractor;
pub mod persist;
pub mod selector;

pub use error::{ExtractionError, PersistError, ProcessErrorKind};
pub use executor::{ExecutionResult, ExtractionExecutor};
pub use extractor::{
    CredentialCheck, CredentialStatus, ExtractionRequest, Extractor, InvoiceData, LineItem,
    RawExtraction,
};
pub use persist::{PersistSource, ResultPersister};
pub use selector::{decide, decide_with_threshold, suggest, Decision, QualitySignals, QUALITY_THRESHOLD};
