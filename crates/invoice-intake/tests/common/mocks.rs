//! Scriptable collaborators for the intake service.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use invoice_intake::analysis::{QualityAnalyzer, QualityReport};
use invoice_intake::db::InvoiceStore;
use invoice_intake::error::AnalysisError;
use invoice_intake::job::{OcrCache, QualityClass, ResultRef};
use invoice_intake::pipeline::{
    CredentialCheck, CredentialStatus, ExtractionError, ExtractionRequest, Extractor,
    InvoiceData, PersistError, PersistSource, RawExtraction, ResultPersister,
};

pub const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-page";

/// Analyzer returning fixed quality signals.
pub struct MockAnalyzer {
    pub confidence: f64,
    pub handwritten: bool,
    pub pages: usize,
    pub fail: bool,
}

impl MockAnalyzer {
    pub fn clean() -> Self {
        Self {
            confidence: 0.92,
            handwritten: false,
            pages: 1,
            fail: false,
        }
    }
}

impl QualityAnalyzer for MockAnalyzer {
    fn analyze(&self, _bytes: &[u8], _filename: &str) -> Result<QualityReport, AnalysisError> {
        if self.fail {
            return Err(AnalysisError::OcrFailed("tesseract exploded".to_string()));
        }
        let classification = if self.handwritten {
            QualityClass::Handwritten
        } else if self.confidence < 0.6 {
            QualityClass::LowQuality
        } else {
            QualityClass::Good
        };
        Ok(QualityReport {
            ocr: OcrCache {
                full_text: "ACME Corp\nFacture F-2024-001\nTotal TTC 120,00 EUR".to_string(),
                words: vec![],
                spatial_grid: None,
            },
            confidence_score: self.confidence,
            is_handwritten: self.handwritten,
            is_low_quality: self.confidence < 0.6,
            classification,
            details: json!({ "word_count": 7, "blur": 12.5 }),
            pages: vec![FAKE_PNG.to_vec(); self.pages],
        })
    }
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed(serde_json::Value),
    Fail(String),
    RejectKey,
}

/// Extractor that counts calls and can sleep before answering.
pub struct MockExtractor {
    behavior: Behavior,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn invoice() -> Self {
        Self::new(Behavior::Succeed(sample_invoice()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(!request.page_paths.is_empty(), "pages should be rendered");
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior {
            Behavior::Succeed(value) => Ok(RawExtraction {
                structured: value.clone(),
                raw_response: value.to_string(),
            }),
            Behavior::Fail(message) => Err(ExtractionError::Failed(message.clone())),
            Behavior::RejectKey => Err(ExtractionError::CredentialRejected(
                "401 invalid x-api-key sk-ant-REDACTED".to_string(),
            )),
        }
    }
}

pub fn sample_invoice() -> serde_json::Value {
    json!({
        "is_invoice": true,
        "provider": "ACME Corp",
        "date": "2024-03-15",
        "invoice_number": "F-2024-001",
        "total_ht": "100,00",
        "total_ttc": 120.0,
        "currency": "eur",
        "line_items": [
            { "designation": "Widget", "quantity": 2, "unit_price": 50.0, "total_ht": 100.0 }
        ]
    })
}

/// Credential check whose answer can be flipped mid-test.
pub struct MockCredentials {
    valid: AtomicBool,
}

impl MockCredentials {
    pub fn new(valid: bool) -> Self {
        Self {
            valid: AtomicBool::new(valid),
        }
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }
}

impl CredentialCheck for MockCredentials {
    fn status(&self) -> CredentialStatus {
        let valid = self.valid.load(Ordering::SeqCst);
        CredentialStatus {
            configured: valid,
            valid,
        }
    }
}

/// Real SQLite persistence with call counters.
pub struct CountingPersister {
    pub inner: InvoiceStore,
    persists: AtomicUsize,
    discards: AtomicUsize,
}

impl CountingPersister {
    pub fn new(inner: InvoiceStore) -> Self {
        Self {
            inner,
            persists: AtomicUsize::new(0),
            discards: AtomicUsize::new(0),
        }
    }

    pub fn persists(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    pub fn discards(&self) -> usize {
        self.discards.load(Ordering::SeqCst)
    }
}

impl ResultPersister for CountingPersister {
    fn persist(
        &self,
        data: &InvoiceData,
        raw_response: &str,
        source: &PersistSource,
    ) -> Result<ResultRef, PersistError> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        self.inner.persist(data, raw_response, source)
    }

    fn discard(&self, result: &ResultRef) -> Result<(), PersistError> {
        self.discards.fetch_add(1, Ordering::SeqCst);
        self.inner.discard(result)
    }
}
