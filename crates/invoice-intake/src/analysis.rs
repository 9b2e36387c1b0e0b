//! The quality analyzer seam. OCR and image heuristics live behind it.

use crate::error::AnalysisError;
use crate::job::{OcrCache, QualityClass};

/// What the analyzer learned about one uploaded document.
#[derive(Debug, Clone, Default)]
pub struct QualityReport {
    pub ocr: OcrCache,
    /// Overall OCR confidence in `[0, 1]`; out-of-range values are clamped.
    pub confidence_score: f64,
    pub is_handwritten: bool,
    pub is_low_quality: bool,
    pub classification: QualityClass,
    /// Free-form metrics (blur, contrast, `word_count`, ...).
    pub details: serde_json::Value,
    /// Rendered pages as PNG bytes, in order.
    pub pages: Vec<Vec<u8>>,
}

impl QualityReport {
    pub fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX).max(1)
    }

    /// Confidence clamped to `[0, 1]`; NaN becomes 0.
    pub fn clamped_confidence(&self) -> f64 {
        if self.confidence_score.is_nan() {
            0.0
        } else {
            self.confidence_score.clamp(0.0, 1.0)
        }
    }
}

/// Blocking analyzer; the service runs it on the blocking thread pool.
pub trait QualityAnalyzer: Send + Sync {
    fn analyze(&self, bytes: &[u8], filename: &str) -> Result<QualityReport, AnalysisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        let mut report = QualityReport {
            confidence_score: 1.7,
            ..Default::default()
        };
        assert_eq!(report.clamped_confidence(), 1.0);
        report.confidence_score = -0.2;
        assert_eq!(report.clamped_confidence(), 0.0);
        report.confidence_score = f64::NAN;
        assert_eq!(report.clamped_confidence(), 0.0);
    }

    #[test]
    fn test_page_count_is_at_least_one() {
        let mut report = QualityReport::default();
        assert_eq!(report.page_count(), 1);
        report.pages = vec![vec![], vec![]];
        assert_eq!(report.page_count(), 2);
    }
}
