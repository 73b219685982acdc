//! Turning raw extractions into structured invoices with a generative model.
//!
//! The model answer is parsed as JSON. An answer that is not JSON at all gets
//! exactly one repair request; keys the repair introduces are dropped. Valid
//! JSON with fields of the wrong shape is coerced instead: the offending
//! fields become null and are reported as warnings. Parsed numbers are then
//! checked against the numbers printed in the document, and every field is
//! scored.

pub mod confidence;
mod model;
pub mod prompt;
pub mod provenance;

pub use model::{GeminiModel, StructuringModel};
pub use provenance::NumberSet;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::de::Error as _;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{InvxError, Result};
use crate::models::config::StructuringConfig;
use crate::models::document::RawExtraction;
use crate::models::invoice::{InvoiceMetadata, LineItem, StructuredInvoice};
use crate::patterns::{CODE_FENCE, JSON_KEY};

/// Shortest extracted text worth sending to the model.
pub const MIN_TEXT_CHARS: usize = 20;

/// Where the parse loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Repair,
}

/// Structures a [`RawExtraction`] into a [`StructuredInvoice`].
pub struct StructuredExtractor {
    model: Arc<dyn StructuringModel>,
    timeout: Duration,
    enforce_provenance: bool,
}

impl StructuredExtractor {
    pub fn new(model: Arc<dyn StructuringModel>, config: &StructuringConfig) -> Self {
        Self {
            model,
            timeout: config.request_timeout(),
            enforce_provenance: config.enforce_provenance,
        }
    }

    /// Ask the model for the invoice, repair once if needed, then guard and score it.
    pub async fn extract(&self, raw: &RawExtraction) -> Result<StructuredInvoice> {
        let text = raw.combined_text();
        if text.trim().chars().count() < MIN_TEXT_CHARS && raw.table_candidates.is_empty() {
            return Err(InvxError::StructuringFailed(format!(
                "extracted text too short to structure ({} chars)",
                text.trim().chars().count()
            )));
        }

        let answer = self.call(&prompt::extraction_prompt(raw)).await?;
        let (mut invoice, coerced) = self.parse_with_repair(answer).await?;

        let mut warnings = raw.warnings.clone();
        warnings.extend(coerced);
        if self.enforce_provenance {
            let numbers = NumberSet::from_extraction(raw);
            if numbers.is_empty() {
                warn!("No numbers found in the document; every numeric field will be nulled");
            } else {
                debug!("{} distinct numbers in the document", numbers.len());
            }
            warnings.extend(numbers.enforce(&mut invoice));
        }

        let report = confidence::score(&invoice);
        info!(
            "Structured invoice {} with confidence {:.2}",
            invoice.invoice_number.as_deref().unwrap_or("<unknown>"),
            report.overall_confidence
        );

        let mut metadata = InvoiceMetadata::new(report);
        metadata.warnings = warnings;
        invoice.metadata = Some(metadata);
        Ok(invoice)
    }

    async fn call(&self, prompt: &str) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.model.generate(prompt)).await {
            Ok(answer) => Ok(answer?),
            Err(_) => {
                warn!("{} did not answer within {:?}", self.model.name(), self.timeout);
                Err(InvxError::StructuringTimeout(self.timeout))
            }
        }
    }

    /// Only answers that are not a JSON object reach the repair call.
    async fn parse_with_repair(&self, answer: String) -> Result<(StructuredInvoice, Vec<String>)> {
        let mut attempt = Attempt::First;
        let mut text = answer;
        loop {
            let error = match parse_invoice(&text) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => e,
            };
            match attempt {
                Attempt::First => {
                    warn!("Model output is not a JSON object ({}), requesting repair", error);
                    let repaired = self.call(&prompt::repair_prompt(&text)).await?;
                    text = strip_added_keys(&text, &repaired);
                    attempt = Attempt::Repair;
                }
                Attempt::Repair => {
                    return Err(InvxError::StructuringFailed(format!(
                        "model output is not a JSON object after repair: {}",
                        error
                    )));
                }
            }
        }
    }
}

/// Remove a surrounding Markdown code fence.
pub fn strip_code_fence(text: &str) -> &str {
    match CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

/// Parse a model answer into an invoice.
///
/// Fails only when the answer is not a JSON object. Fields whose values do
/// not fit the schema are dropped (left null) and described in the returned
/// warnings; a line item that does not fit is dropped from the list.
pub fn parse_invoice(text: &str) -> std::result::Result<(StructuredInvoice, Vec<String>), serde_json::Error> {
    let value: Value = serde_json::from_str(strip_code_fence(text))?;
    let Value::Object(fields) = value else {
        return Err(serde_json::Error::custom("expected a JSON object"));
    };

    let mut warnings = Vec::new();
    let mut kept = Map::new();
    for (key, field) in fields {
        if let Some(field) = coerce_field(&key, field, &mut warnings) {
            kept.insert(key, field);
        }
    }

    let invoice = serde_json::from_value(Value::Object(kept))?;
    Ok((invoice, warnings))
}

fn coerce_field(key: &str, field: Value, warnings: &mut Vec<String>) -> Option<Value> {
    let alone = Value::Object(Map::from_iter([(key.to_string(), field.clone())]));
    if serde_json::from_value::<StructuredInvoice>(alone).is_ok() {
        return Some(field);
    }

    if let ("items", Value::Array(items)) = (key, &field) {
        let total = items.len();
        let fitting: Vec<Value> = items
            .iter()
            .filter(|item| serde_json::from_value::<LineItem>((*item).clone()).is_ok())
            .cloned()
            .collect();
        warnings.push(format!(
            "items: {} of {} entries have an unexpected shape, dropped",
            total - fitting.len(),
            total
        ));
        return Some(Value::Array(fitting));
    }

    debug!("Dropping {}: {}", key, field);
    warnings.push(format!("{}: unexpected value type, set to null", key));
    None
}

/// Drop object keys in `repaired` that never appeared in `broken`.
///
/// Returns `repaired` unchanged when it does not parse, so the caller's next
/// parse reports the real error.
fn strip_added_keys(broken: &str, repaired: &str) -> String {
    let Ok(mut value) = serde_json::from_str::<Value>(strip_code_fence(repaired)) else {
        return repaired.to_string();
    };
    let known: HashSet<&str> = JSON_KEY
        .captures_iter(broken)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect();

    let mut removed = Vec::new();
    retain_known(&mut value, &known, &mut removed);
    if removed.is_empty() {
        return repaired.to_string();
    }
    warn!("Repair introduced new keys, dropping: {}", removed.join(", "));
    value.to_string()
}

fn retain_known(value: &mut Value, known: &HashSet<&str>, removed: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            map.retain(|key, _| {
                let keep = known.contains(key.as_str());
                if !keep {
                    removed.push(key.clone());
                }
                keep
            });
            for child in map.values_mut() {
                retain_known(child, known, removed);
            }
        }
        Value::Array(items) => {
            for child in items {
                retain_known(child, known, removed);
            }
        }
        _ => {}
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::ScriptedModel;
    use super::*;
    use crate::error::{ErrorKind, ModelError};
    use crate::models::document::{DocumentPath, TableRow};
    use crate::models::invoice::Amount;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    fn raw() -> RawExtraction {
        let header: Vec<String> = ["Description", "Qty", "Unit Price", "Total"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        RawExtraction {
            path: DocumentPath::Digital,
            pages: 1,
            prose_text: "Invoice #INV-100\nTotal: 250.00".to_string(),
            table_text: String::new(),
            table_candidates: vec![TableRow::from_values(
                1,
                0,
                Some(header.as_slice()),
                ["Widget", "2", "100.00", "200.00"].iter().map(|s| s.to_string()).collect(),
            )],
            warnings: Vec::new(),
        }
    }

    fn extractor(model: Arc<ScriptedModel>) -> StructuredExtractor {
        StructuredExtractor::new(model, &StructuringConfig::default())
    }

    const GOOD: &str = r#"{"invoice_number": "INV-100", "items": [{"description": "Widget", "quantity": 2, "unit_price": 100.00, "total": 200.00}], "total": 250.00}"#;

    #[tokio::test]
    async fn test_valid_answer_in_code_fence() {
        let model = Arc::new(ScriptedModel::answering(&[&format!("```json\n{}\n```", GOOD)]));
        let invoice = extractor(model.clone()).extract(&raw()).await.unwrap();

        assert_eq!(model.calls(), 1);
        assert_eq!(invoice.invoice_number.as_deref(), Some("INV-100"));
        assert_eq!(invoice.total, Some(Amount::Value(Decimal::new(25000, 2))));
        assert_eq!(invoice.items.len(), 1);
        assert!(invoice.overall_confidence() > 0.0);
    }

    #[tokio::test]
    async fn test_one_repair_then_success() {
        let broken = r#"{"invoice_number": "INV-100", "total": 250.00"#;
        let repaired = r#"{"invoice_number": "INV-100", "total": 250.00, "notes": "added"}"#;
        let model = Arc::new(ScriptedModel::answering(&[broken, repaired]));
        let invoice = extractor(model.clone()).extract(&raw()).await.unwrap();

        assert_eq!(model.calls(), 2);
        assert!(model.prompts.lock().unwrap()[1].contains("JSON repair engine"));
        assert_eq!(invoice.invoice_number.as_deref(), Some("INV-100"));
    }

    #[tokio::test]
    async fn test_null_blocks_need_no_repair() {
        let answer = r#"{"invoice_number":"INV-100","vendor":null,"customer":null,"items":null,"total":250.00}"#;
        let model = Arc::new(ScriptedModel::answering(&[answer]));
        let invoice = extractor(model.clone()).extract(&raw()).await.unwrap();

        assert_eq!(model.calls(), 1);
        assert_eq!(invoice.invoice_number.as_deref(), Some("INV-100"));
        assert!(invoice.items.is_empty());
        assert!(invoice.metadata.unwrap().warnings.is_empty());
    }

    #[tokio::test]
    async fn test_numeric_invoice_number_needs_no_repair() {
        let answer = r#"{"invoice_number": 12345, "total": 250.00}"#;
        let model = Arc::new(ScriptedModel::answering(&[answer]));
        let invoice = extractor(model.clone()).extract(&raw()).await.unwrap();

        assert_eq!(model.calls(), 1);
        assert_eq!(invoice.invoice_number.as_deref(), Some("12345"));
        assert_eq!(invoice.total, Some(Amount::Value(Decimal::new(25000, 2))));
    }

    #[tokio::test]
    async fn test_misshapen_fields_are_coerced() {
        let answer = r#"{"invoice_number": "INV-100", "vendor": "ACME", "items": [{"description": "Widget", "total": 200.00}, "Gadget"], "total": 250.00}"#;
        let model = Arc::new(ScriptedModel::answering(&[answer]));
        let invoice = extractor(model.clone()).extract(&raw()).await.unwrap();

        assert_eq!(model.calls(), 1);
        assert!(invoice.vendor.name.is_none());
        assert_eq!(invoice.items.len(), 1);
        assert_eq!(invoice.items[0].description.as_deref(), Some("Widget"));
        let warnings = invoice.metadata.unwrap().warnings;
        assert_eq!(
            warnings,
            vec![
                "items: 1 of 2 entries have an unexpected shape, dropped".to_string(),
                "vendor: unexpected value type, set to null".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_non_object_answer_is_repaired() {
        let wrapped = r#"[{"invoice_number": "INV-100", "total": 250.00}]"#;
        let unwrapped = r#"{"invoice_number": "INV-100", "total": 250.00}"#;
        let model = Arc::new(ScriptedModel::answering(&[wrapped, unwrapped]));
        let invoice = extractor(model.clone()).extract(&raw()).await.unwrap();

        assert_eq!(model.calls(), 2);
        assert_eq!(invoice.invoice_number.as_deref(), Some("INV-100"));
    }

    #[tokio::test]
    async fn test_second_failure_is_structuring_failed() {
        let model = Arc::new(ScriptedModel::answering(&["{not json", "{still not json"]));
        let err = extractor(model.clone()).extract(&raw()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::StructuringFailed);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_structuring_failed() {
        let model = Arc::new(ScriptedModel::new(vec![Err(ModelError::Status {
            status: 503,
            body: "overloaded".to_string(),
        })]));
        let err = extractor(model).extract(&raw()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StructuringFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct() {
        struct Stalled;

        #[async_trait]
        impl StructuringModel for Stalled {
            async fn generate(&self, _prompt: &str) -> std::result::Result<String, ModelError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
        }

        let err = StructuredExtractor::new(Arc::new(Stalled), &StructuringConfig::default())
            .extract(&raw())
            .await
            .unwrap_err();
        match err {
            InvxError::StructuringTimeout(limit) => assert_eq!(limit, Duration::from_secs(60)),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invented_number_is_removed() {
        let answer = r#"{"invoice_number": "INV-100", "total": 250.00, "tax_amount": 47.50}"#;
        let model = Arc::new(ScriptedModel::answering(&[answer]));
        let invoice = extractor(model).extract(&raw()).await.unwrap();

        assert_eq!(invoice.tax_amount, None);
        let metadata = invoice.metadata.unwrap();
        assert_eq!(metadata.warnings.len(), 1);
        assert_eq!(metadata.confidence.confidence_scores["tax_amount"], 0.0);
    }

    #[tokio::test]
    async fn test_short_text_is_rejected() {
        let raw = RawExtraction {
            path: DocumentPath::Scanned,
            pages: 1,
            prose_text: "x".to_string(),
            table_text: String::new(),
            table_candidates: Vec::new(),
            warnings: Vec::new(),
        };
        let model = Arc::new(ScriptedModel::answering(&[GOOD]));
        let err = extractor(model.clone()).extract(&raw).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StructuringFailed);
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_strip_added_keys() {
        let broken = r#"{"vendor": {"name": "ACME"#;
        let repaired = r#"{"vendor": {"name": "ACME", "vat_id": "X"}, "extra": 1}"#;
        let cleaned: Value = serde_json::from_str(&strip_added_keys(broken, repaired)).unwrap();
        assert_eq!(cleaned, serde_json::json!({"vendor": {"name": "ACME"}}));
    }
}
