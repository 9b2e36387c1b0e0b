//! Quality-driven pipeline selection.

use serde::Serialize;

use crate::job::{AnalysisJob, Pipeline, PipelinePreference};

/// Minimum OCR confidence for the local pipeline to be suggested.
pub const QUALITY_THRESHOLD: f64 = 0.6;

/// The analysis signals the selector looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualitySignals {
    pub confidence_score: f64,
    pub is_handwritten: bool,
}

impl From<&AnalysisJob> for QualitySignals {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            confidence_score: job.confidence_score,
            is_handwritten: job.is_handwritten,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub pipeline: Pipeline,
    pub suggested: Pipeline,
    pub requires_confirmation: bool,
    pub warning: Option<String>,
}

/// Pipeline the analysis recommends. NaN confidence counts as below threshold.
pub fn suggest(signals: QualitySignals, threshold: f64) -> Pipeline {
    let acceptable = signals.confidence_score >= threshold;
    if signals.is_handwritten || !acceptable {
        Pipeline::Cloud
    } else {
        Pipeline::Local
    }
}

pub fn decide(
    signals: QualitySignals,
    preference: PipelinePreference,
    cloud_credential_valid: bool,
) -> Decision {
    decide_with_threshold(signals, preference, cloud_credential_valid, QUALITY_THRESHOLD)
}

pub fn decide_with_threshold(
    signals: QualitySignals,
    preference: PipelinePreference,
    cloud_credential_valid: bool,
    threshold: f64,
) -> Decision {
    let suggested = suggest(signals, threshold);

    match preference {
        PipelinePreference::Auto => Decision {
            pipeline: suggested,
            suggested,
            requires_confirmation: false,
            warning: None,
        },
        PipelinePreference::Cloud => Decision {
            pipeline: Pipeline::Cloud,
            suggested,
            requires_confirmation: false,
            warning: None,
        },
        PipelinePreference::Local if suggested == Pipeline::Cloud => Decision {
            pipeline: Pipeline::Local,
            suggested,
            requires_confirmation: true,
            warning: Some(quality_warning(signals, threshold, cloud_credential_valid)),
        },
        PipelinePreference::Local => Decision {
            pipeline: Pipeline::Local,
            suggested,
            requires_confirmation: false,
            warning: None,
        },
    }
}

fn quality_warning(signals: QualitySignals, threshold: f64, cloud_credential_valid: bool) -> String {
    let mut warning = if signals.is_handwritten {
        "This document appears to be handwritten; local extraction may be inaccurate.".to_string()
    } else if signals.confidence_score.is_nan() {
        "Document quality could not be assessed; local extraction may be inaccurate.".to_string()
    } else {
        format!(
            "Document quality is low ({:.0}% confidence, below {:.0}%); local extraction may be inaccurate.",
            signals.confidence_score * 100.0,
            threshold * 100.0
        )
    };
    if cloud_credential_valid {
        warning.push_str(" The cloud pipeline is recommended.");
    } else {
        warning.push_str(" The cloud pipeline is recommended but no valid API key is configured.");
    }
    warning
}
