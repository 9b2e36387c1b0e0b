//! Analysis job record and its status graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of OCR characters exposed as a preview.
pub const PREVIEW_CHARS: usize = 500;

/// Lifecycle status of an analysis job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Analyzed,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Analyzed => "analyzed",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analyzed" => Some(JobStatus::Analyzed),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "expired" => Some(JobStatus::Expired),
            _ => None,
        }
    }

    /// Completed, failed and expired jobs never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired
        )
    }

    /// Edges of the job state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Analyzed, JobStatus::Processing)
                | (JobStatus::Analyzed, JobStatus::Expired)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Expired)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extraction strategy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Pipeline {
    /// On-device vision-language model.
    Local,
    /// Remote LLM API.
    Cloud,
}

impl Pipeline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pipeline::Local => "local",
            Pipeline::Cloud => "cloud",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Pipeline::Local),
            "cloud" => Some(Pipeline::Cloud),
            _ => None,
        }
    }
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user's processing preference.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePreference {
    Local,
    Cloud,
    #[default]
    Auto,
}

/// Quality label produced by the analyzer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualityClass {
    Good,
    LowQuality,
    Handwritten,
    ExtremelyLowQuality,
    #[default]
    Unknown,
}

impl QualityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityClass::Good => "good",
            QualityClass::LowQuality => "low_quality",
            QualityClass::Handwritten => "handwritten",
            QualityClass::ExtremelyLowQuality => "extremely_low_quality",
            QualityClass::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "good" => QualityClass::Good,
            "low_quality" => QualityClass::LowQuality,
            "handwritten" => QualityClass::Handwritten,
            "extremely_low_quality" => QualityClass::ExtremelyLowQuality,
            _ => QualityClass::Unknown,
        }
    }
}

/// Where the extraction result ended up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ResultRef {
    Invoice(i64),
    Document(i64),
    /// Processed with `save_to_db = false`.
    Unsaved,
}

impl ResultRef {
    pub fn invoice_id(&self) -> Option<i64> {
        match self {
            ResultRef::Invoice(id) => Some(*id),
            _ => None,
        }
    }

    pub fn document_id(&self) -> Option<i64> {
        match self {
            ResultRef::Document(id) => Some(*id),
            _ => None,
        }
    }
}

/// A single OCR word with its confidence (0-100) and bounding box.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub conf: f32,
    #[serde(default)]
    pub bbox: [u32; 4],
}

/// OCR output kept on the job until processing finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OcrCache {
    pub full_text: String,
    #[serde(default)]
    pub words: Vec<OcrWord>,
    #[serde(default)]
    pub spatial_grid: Option<String>,
}

/// The unit of work tracking one document from analysis through extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisJob {
    pub id: String,
    pub status: JobStatus,
    pub original_filename: String,
    pub file_extension: Option<String>,
    pub mime_type: Option<String>,
    pub page_count: u32,
    pub confidence_score: f64,
    pub is_handwritten: bool,
    pub is_low_quality: bool,
    pub quality_classification: QualityClass,
    pub quality_details: serde_json::Value,
    pub suggested_pipeline: Pipeline,
    pub ocr_text_cache: Option<OcrCache>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result_ref: Option<ResultRef>,
    pub processing_method: Option<Pipeline>,
    pub processing_error: Option<String>,
}

impl AnalysisJob {
    pub fn is_past_ttl(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Status as every reader must see it: a job past its TTL that never
    /// completed reads as expired even before the sweeper touches it.
    /// Failed jobs are included; only a completed job outlives its TTL.
    pub fn effective_status(&self, now: DateTime<Utc>) -> JobStatus {
        match self.status {
            JobStatus::Completed => JobStatus::Completed,
            _ if self.is_past_ttl(now) => JobStatus::Expired,
            status => status,
        }
    }

    pub fn can_be_processed(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == JobStatus::Analyzed
    }

    /// Copy of this job with the lazy expiration applied.
    pub fn observed_at(mut self, now: DateTime<Utc>) -> Self {
        self.status = self.effective_status(now);
        self
    }

    pub fn preview_text(&self) -> String {
        self.ocr_text_cache
            .as_ref()
            .map(|c| c.full_text.chars().take(PREVIEW_CHARS).collect())
            .unwrap_or_default()
    }

    pub fn word_count(&self) -> u64 {
        self.quality_details
            .get("word_count")
            .and_then(|v| v.as_u64())
            .or_else(|| self.ocr_text_cache.as_ref().map(|c| c.words.len() as u64))
            .unwrap_or(0)
    }
}
