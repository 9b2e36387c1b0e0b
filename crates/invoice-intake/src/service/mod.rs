pub mod orchestrator;
pub mod types;

pub use orchestrator::{IntakeCollaborators, IntakeService, IntakeSettings};
pub use types::{AnalysisSummary, CleanupReport, ProcessRequest, ProcessResult, StatusSnapshot};
