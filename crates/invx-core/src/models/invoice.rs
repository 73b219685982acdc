//! Canonical invoice schema produced by the structuring stage.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use serde_json::value::RawValue;

use super::document::DocumentPath;
use crate::patterns::ISO_DATE;

/// A structured invoice.
///
/// Every scalar is nullable: a field the model could not resolve from the
/// document stays `None` rather than being guessed. `null` is also accepted
/// for the vendor, customer and items blocks, and text fields take numbers
/// (an invoice number printed as `12345` is still an invoice number).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredInvoice {
    #[serde(deserialize_with = "lenient_text")]
    pub invoice_number: Option<String>,

    /// Issue date.
    pub invoice_date: Option<DateValue>,

    /// Payment due date.
    pub due_date: Option<DateValue>,

    /// Seller information.
    #[serde(deserialize_with = "null_as_default")]
    pub vendor: Vendor,

    /// Buyer information.
    #[serde(deserialize_with = "null_as_default")]
    pub customer: Customer,

    /// Line items in document order.
    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<LineItem>,

    pub subtotal: Option<Amount>,
    pub tax_amount: Option<Amount>,
    pub tax_percentage: Option<Amount>,
    pub discount: Option<Amount>,
    pub total: Option<Amount>,

    /// Currency code as printed, e.g. "EUR".
    #[serde(deserialize_with = "lenient_text")]
    pub currency: Option<String>,

    #[serde(deserialize_with = "lenient_text")]
    pub payment_terms: Option<String>,

    /// Extraction metadata.
    #[serde(rename = "_metadata", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InvoiceMetadata>,
}

/// Seller block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vendor {
    #[serde(deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub address: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub phone: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub email: Option<String>,
}

/// Buyer block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Customer {
    #[serde(deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub address: Option<String>,
}

/// A single line item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItem {
    #[serde(deserialize_with = "lenient_text")]
    pub description: Option<String>,
    pub quantity: Option<Amount>,
    pub unit_price: Option<Amount>,
    pub total: Option<Amount>,
}

/// `null` reads as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Text field that also takes numbers and booleans; arrays and objects are rejected.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(Value::Bool(flag)) => Ok(Some(flag.to_string())),
        Some(other) => Err(D::Error::custom(format!("expected text, found {}", other))),
    }
}

/// A numeric field value.
///
/// Model output that cannot be read as a number is kept verbatim so the
/// caller can see what was emitted; it scores lower confidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Amount {
    Value(Decimal),
    Unparsed(String),
}

impl Amount {
    /// Read a printed amount, tolerating currency symbols and thousands separators.
    pub fn parse(raw: &str) -> Self {
        match parse_scientific(raw).or_else(|| parse_decimal(raw)) {
            Some(value) => Amount::Value(value),
            None => Amount::Unparsed(raw.to_string()),
        }
    }

    /// Read a JSON number. Exponent forms go through `from_scientific`; values
    /// out of decimal range stay unparsed.
    fn from_json_number(number: &serde_json::Number) -> Self {
        let text = number.to_string();
        let parsed = if is_scientific(&text) {
            Decimal::from_scientific(&text).ok()
        } else {
            Decimal::from_str(&text).ok()
        };
        match parsed {
            Some(value) => Amount::Value(value),
            None => Amount::Unparsed(text),
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        match self {
            Amount::Value(value) => Some(*value),
            Amount::Unparsed(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Amount::Value(_))
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Amount::Value(value)
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Amount::Value(value) => write!(f, "{}", value),
            Amount::Unparsed(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            // Written as the exact decimal literal, not through f64.
            Amount::Value(value) => RawValue::from_string(value.to_string())
                .map_err(S::Error::custom)?
                .serialize(serializer),
            Amount::Unparsed(raw) => serializer.serialize_str(raw),
        }
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Number(number) => Amount::from_json_number(&number),
            Value::String(raw) => Amount::parse(&raw),
            other => Amount::Unparsed(other.to_string()),
        })
    }
}

/// A date field value: ISO `YYYY-MM-DD`, or the raw text the model emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateValue {
    Date(NaiveDate),
    Unparsed(String),
}

impl DateValue {
    /// Only zero-padded `YYYY-MM-DD` that is also a real calendar date counts as ISO.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if !ISO_DATE.is_match(trimmed) {
            return DateValue::Unparsed(raw.to_string());
        }
        match NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            Ok(date) => DateValue::Date(date),
            Err(_) => DateValue::Unparsed(raw.to_string()),
        }
    }

    pub fn is_iso(&self) -> bool {
        matches!(self, DateValue::Date(_))
    }
}

impl std::fmt::Display for DateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateValue::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            DateValue::Unparsed(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for DateValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DateValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(raw) => DateValue::parse(&raw),
            other => DateValue::Unparsed(other.to_string()),
        })
    }
}

/// Per-field confidence with its aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    /// Score in [0, 1] for every scored field.
    pub confidence_scores: BTreeMap<String, f64>,

    /// Mean of the field scores, rounded to two decimals.
    pub overall_confidence: f64,

    /// When the scores were computed.
    pub extraction_timestamp: DateTime<Utc>,
}

/// Metadata attached to every produced invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceMetadata {
    #[serde(flatten)]
    pub confidence: ConfidenceReport,

    /// Extraction path the document took.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<DocumentPath>,

    /// Processing time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,

    /// Warnings or issues encountered during extraction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl InvoiceMetadata {
    pub fn new(confidence: ConfidenceReport) -> Self {
        Self {
            confidence,
            source_path: None,
            processing_time_ms: None,
            warnings: Vec::new(),
        }
    }
}

impl StructuredInvoice {
    /// Overall confidence, 0.0 before scoring.
    pub fn overall_confidence(&self) -> f64 {
        self.metadata
            .as_ref()
            .map(|m| m.confidence.overall_confidence)
            .unwrap_or(0.0)
    }

    /// Arithmetic consistency checks. Reports only; never alters values.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.invoice_number.is_none() {
            issues.push("Missing invoice number".to_string());
        }

        if self.items.is_empty() {
            issues.push("No line items".to_string());
        }

        if self.total.is_none() {
            issues.push("Missing total".to_string());
        }

        let tolerance = Decimal::new(1, 2);

        for (index, item) in self.items.iter().enumerate() {
            let (Some(qty), Some(price), Some(total)) = (
                item.quantity.as_ref().and_then(Amount::value),
                item.unit_price.as_ref().and_then(Amount::value),
                item.total.as_ref().and_then(Amount::value),
            ) else {
                continue;
            };
            if (qty * price - total).abs() > tolerance {
                issues.push(format!(
                    "Item {}: quantity x unit price ({}) differs from total ({})",
                    index + 1,
                    qty * price,
                    total
                ));
            }
        }

        let item_totals: Option<Decimal> = self
            .items
            .iter()
            .map(|i| i.total.as_ref().and_then(Amount::value))
            .sum();
        if let (Some(sum), Some(subtotal)) = (item_totals, self.subtotal.as_ref().and_then(Amount::value)) {
            if !self.items.is_empty() && (sum - subtotal).abs() > tolerance {
                issues.push(format!(
                    "Line item totals ({}) differ from subtotal ({})",
                    sum, subtotal
                ));
            }
        }

        issues
    }
}

fn is_scientific(text: &str) -> bool {
    text.contains(|c| c == 'e' || c == 'E')
}

/// `1e3`, `2.5E-2`; nothing else.
fn parse_scientific(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    let plain = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if !plain || !is_scientific(trimmed) {
        return None;
    }
    Decimal::from_scientific(trimmed).ok()
}

/// Parse a printed number into a decimal.
///
/// Accepts `1,234.50`, `1.234,50`, `250,00`, `€ 250.00`, `23%`. When both
/// separators occur the later one is the decimal point; a lone comma followed
/// by one or two digits is a decimal comma.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    let negative = trimmed.starts_with('-') || (trimmed.starts_with('(') && trimmed.ends_with(')'));
    let kept: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    // Reject strings that are mostly words with an incidental digit.
    let letters = trimmed.chars().filter(|c| c.is_alphabetic()).count();
    if letters > 3 {
        return None;
    }

    let last_dot = kept.rfind('.');
    let last_comma = kept.rfind(',');
    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) if dot > comma => kept.replace(',', ""),
        (Some(_), Some(_)) => kept.replace('.', "").replace(',', "."),
        (None, Some(comma)) => {
            let decimals = kept.len() - comma - 1;
            if kept.matches(',').count() == 1 && (1..=2).contains(&decimals) {
                kept.replace(',', ".")
            } else {
                kept.replace(',', "")
            }
        }
        (Some(_), None) if kept.matches('.').count() > 1 => kept.replace('.', ""),
        _ => kept,
    };

    let value = Decimal::from_str(normalized.trim_matches('.')).ok()?;
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_decimal_formats() {
        assert_eq!(parse_decimal("250.00"), Some(Decimal::new(25000, 2)));
        assert_eq!(parse_decimal("1,234.50"), Some(Decimal::new(123450, 2)));
        assert_eq!(parse_decimal("1.234,50"), Some(Decimal::new(123450, 2)));
        assert_eq!(parse_decimal("250,00"), Some(Decimal::new(25000, 2)));
        assert_eq!(parse_decimal("1,000"), Some(Decimal::new(1000, 0)));
        assert_eq!(parse_decimal("€ 250.00"), Some(Decimal::new(25000, 2)));
        assert_eq!(parse_decimal("23%"), Some(Decimal::new(23, 0)));
        assert_eq!(parse_decimal("-5.5"), Some(Decimal::new(-55, 1)));
        assert_eq!(parse_decimal("n/a"), None);
        assert_eq!(parse_decimal("about twelve 12"), None);
    }

    #[test]
    fn test_amount_deserialize() {
        let number: Amount = serde_json::from_str("250.0").unwrap();
        assert_eq!(number, Amount::Value(Decimal::new(250, 0)));

        let text: Amount = serde_json::from_str("\"1,200.00 EUR\"").unwrap();
        assert_eq!(text, Amount::Value(Decimal::new(1200, 0)));

        let junk: Amount = serde_json::from_str("\"see attachment\"").unwrap();
        assert_eq!(junk, Amount::Unparsed("see attachment".to_string()));
    }

    #[test]
    fn test_amount_exponent_forms() {
        let small: Amount = serde_json::from_str("1e3").unwrap();
        assert_eq!(small, Amount::Value(Decimal::new(1000, 0)));

        let fraction: Amount = serde_json::from_str("2.5e-2").unwrap();
        assert_eq!(fraction, Amount::Value(Decimal::new(25, 3)));

        // Out of decimal range: kept verbatim, never read as "130".
        let huge: Amount = serde_json::from_str("1e30").unwrap();
        assert!(!huge.is_numeric());
        assert_ne!(huge.value(), Some(Decimal::new(130, 0)));

        assert_eq!(Amount::parse("1e3"), Amount::Value(Decimal::new(1000, 0)));
        assert_eq!(Amount::parse("12 EUR"), Amount::Value(Decimal::new(12, 0)));
    }

    #[test]
    fn test_amount_serializes_exact_decimal() {
        let json = serde_json::to_string(&Amount::Value(Decimal::new(25000, 2))).unwrap();
        assert_eq!(json, "250.00");

        let precise = Decimal::from_str("12345678901234567.89").unwrap();
        let json = serde_json::to_string(&Amount::Value(precise)).unwrap();
        assert_eq!(json, "12345678901234567.89");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert!(back.is_numeric());
    }

    #[test]
    fn test_date_value() {
        let iso: DateValue = serde_json::from_str("\"2024-03-01\"").unwrap();
        assert!(iso.is_iso());
        assert_eq!(serde_json::to_string(&iso).unwrap(), "\"2024-03-01\"");

        let loose: DateValue = serde_json::from_str("\"01/03/2024\"").unwrap();
        assert_eq!(loose, DateValue::Unparsed("01/03/2024".to_string()));

        assert!(!DateValue::parse("2024-3-1").is_iso());
        assert!(!DateValue::parse("2024-02-30").is_iso());
    }

    #[test]
    fn test_invoice_from_model_json() {
        let json = r#"{
            "invoice_number": "INV-100",
            "invoice_date": "2024-01-15",
            "vendor": {"name": "ACME"},
            "items": [{"description": "Widget", "quantity": 2, "unit_price": "100.00", "total": 200.00}],
            "total": 250.00,
            "currency": "EUR",
            "unexpected": true
        }"#;
        let invoice: StructuredInvoice = serde_json::from_str(json).unwrap();
        assert_eq!(invoice.invoice_number.as_deref(), Some("INV-100"));
        assert_eq!(invoice.vendor.name.as_deref(), Some("ACME"));
        assert_eq!(invoice.items.len(), 1);
        assert_eq!(invoice.items[0].unit_price, Some(Amount::Value(Decimal::new(100, 0))));
        assert_eq!(invoice.total, Some(Amount::Value(Decimal::new(250, 0))));
        assert!(invoice.due_date.is_none());
        assert!(invoice.metadata.is_none());
    }

    #[test]
    fn test_null_blocks_read_as_empty() {
        let json = r#"{"invoice_number": "INV-100", "vendor": null, "customer": null, "items": null, "total": 250.00}"#;
        let invoice: StructuredInvoice = serde_json::from_str(json).unwrap();
        assert_eq!(invoice.vendor, Vendor::default());
        assert_eq!(invoice.customer, Customer::default());
        assert!(invoice.items.is_empty());
        assert_eq!(invoice.total, Some(Amount::Value(Decimal::new(250, 0))));
    }

    #[test]
    fn test_numbers_accepted_as_text() {
        let json = r#"{"invoice_number": 12345, "vendor": {"phone": 5551234}, "currency": null}"#;
        let invoice: StructuredInvoice = serde_json::from_str(json).unwrap();
        assert_eq!(invoice.invoice_number.as_deref(), Some("12345"));
        assert_eq!(invoice.vendor.phone.as_deref(), Some("5551234"));
        assert!(invoice.currency.is_none());

        assert!(serde_json::from_str::<StructuredInvoice>(r#"{"invoice_number": ["A", "B"]}"#).is_err());
    }

    #[test]
    fn test_validate_reports_mismatch() {
        let invoice = StructuredInvoice {
            invoice_number: Some("A-1".into()),
            items: vec![LineItem {
                description: Some("Widget".into()),
                quantity: Some(Decimal::new(2, 0).into()),
                unit_price: Some(Decimal::new(100, 0).into()),
                total: Some(Decimal::new(150, 0).into()),
            }],
            total: Some(Decimal::new(150, 0).into()),
            ..Default::default()
        };
        let issues = invoice.validate();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("Item 1"));
    }
}
