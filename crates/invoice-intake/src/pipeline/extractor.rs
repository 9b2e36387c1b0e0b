//! Collaborator seams of the processing phase: the extractors themselves,
//! the credential check guarding the cloud one, and the structured invoice
//! they must produce.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use super::error::ExtractionError;
use crate::job::OcrCache;

/// Everything an extractor may look at for one job.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub job_id: String,
    pub original_filename: String,
    pub page_paths: Vec<PathBuf>,
    /// OCR text from the analysis phase, when still cached.
    pub ocr: Option<OcrCache>,
}

/// Unvalidated extractor output.
#[derive(Debug, Clone, Default)]
pub struct RawExtraction {
    pub structured: serde_json::Value,
    pub raw_response: String,
}

/// A local or cloud document extractor.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<RawExtraction, ExtractionError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    pub configured: bool,
    pub valid: bool,
}

/// Reports whether the cloud extractor can be used.
pub trait CredentialCheck: Send + Sync {
    fn status(&self) -> CredentialStatus;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LineItem {
    #[serde(default)]
    pub designation: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_ht: Option<f64>,
}

/// Validated extraction result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceData {
    #[serde(default = "default_true")]
    pub is_invoice: bool,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_ht: Option<f64>,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub total_ttc: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

fn default_true() -> bool {
    true
}

impl InvoiceData {
    pub fn from_value(value: serde_json::Value) -> Result<Self, ExtractionError> {
        if !value.is_object() {
            return Err(ExtractionError::Malformed(format!(
                "expected a JSON object, got {}",
                json_type_name(&value)
            )));
        }
        serde_json::from_value(value).map_err(|e| ExtractionError::Malformed(e.to_string()))
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Accepts amounts as numbers or as strings like `"1 234,50"`.
/// Unparseable strings become `None` instead of failing the whole document.
fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Amount>::deserialize(deserializer)? {
        Some(Amount::Number(n)) => Some(n),
        Some(Amount::Text(s)) => parse_amount(&s),
        None => None,
    })
}

fn parse_amount(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_invoice_defaults() {
        let data = InvoiceData::from_value(json!({ "provider": "ACME" })).unwrap();
        assert!(data.is_invoice);
        assert_eq!(data.provider.as_deref(), Some("ACME"));
        assert!(data.line_items.is_empty());
    }

    #[test]
    fn test_amounts_accept_numeric_strings() {
        let data = InvoiceData::from_value(json!({
            "total_ht": "1 000,50",
            "total_ttc": 1200.6,
            "line_items": [{ "designation": "Widget", "quantity": "2", "unit_price": "n/a" }]
        }))
        .unwrap();
        assert_eq!(data.total_ht, Some(1000.5));
        assert_eq!(data.total_ttc, Some(1200.6));
        assert_eq!(data.line_items[0].quantity, Some(2.0));
        assert_eq!(data.line_items[0].unit_price, None);
    }

    #[test]
    fn test_non_object_is_malformed() {
        let err = InvoiceData::from_value(json!(["not", "an", "invoice"])).unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_wrong_field_type_is_malformed() {
        let err = InvoiceData::from_value(json!({ "line_items": "none" })).unwrap_err();
        assert!(matches!(err, ExtractionError::Malformed(_)));
    }

    #[test]
    fn test_other_document() {
        let data = InvoiceData::from_value(json!({ "is_invoice": false })).unwrap();
        assert!(!data.is_invoice);
    }
}
