pub mod model;
pub mod store;

pub use model::{
    AnalysisJob, JobStatus, OcrCache, OcrWord, Pipeline, PipelinePreference, QualityClass,
    ResultRef,
};
pub use store::{check_transition, JobStore, JobUpdate, MemoryJobStore};
