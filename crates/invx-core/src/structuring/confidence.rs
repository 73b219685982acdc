//! Field-presence confidence scoring.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::models::invoice::{Amount, ConfidenceReport, DateValue, StructuredInvoice};

/// Score of a field that is present and well-formed.
pub const PRESENT: f64 = 0.9;
/// Score of a field that is present but malformed.
pub const MALFORMED: f64 = 0.3;
/// Score of a missing field.
pub const ABSENT: f64 = 0.0;

/// Fields that contribute to the overall score.
pub const SCORED_FIELDS: [&str; 11] = [
    "invoice_number",
    "invoice_date",
    "due_date",
    "subtotal",
    "tax_amount",
    "tax_percentage",
    "discount",
    "total",
    "currency",
    "payment_terms",
    "items",
];

fn text_score(value: &Option<String>) -> f64 {
    match value {
        Some(text) if !text.trim().is_empty() => PRESENT,
        _ => ABSENT,
    }
}

fn date_score(value: &Option<DateValue>) -> f64 {
    match value {
        Some(date) if date.is_iso() => PRESENT,
        Some(_) => MALFORMED,
        None => ABSENT,
    }
}

fn amount_score(value: &Option<Amount>) -> f64 {
    match value {
        Some(amount) if amount.is_numeric() => PRESENT,
        Some(_) => MALFORMED,
        None => ABSENT,
    }
}

/// Per-field scores and their mean, rounded to two decimals.
///
/// Only the top-level [`SCORED_FIELDS`] are scored. Vendor and customer
/// details do not contribute, and `items` counts as a single field no
/// matter how many lines it holds.
pub fn score(invoice: &StructuredInvoice) -> ConfidenceReport {
    let scores: BTreeMap<String, f64> = SCORED_FIELDS
        .iter()
        .map(|field| {
            let score = match *field {
                "invoice_number" => text_score(&invoice.invoice_number),
                "invoice_date" => date_score(&invoice.invoice_date),
                "due_date" => date_score(&invoice.due_date),
                "subtotal" => amount_score(&invoice.subtotal),
                "tax_amount" => amount_score(&invoice.tax_amount),
                "tax_percentage" => amount_score(&invoice.tax_percentage),
                "discount" => amount_score(&invoice.discount),
                "total" => amount_score(&invoice.total),
                "currency" => text_score(&invoice.currency),
                "payment_terms" => text_score(&invoice.payment_terms),
                "items" if !invoice.items.is_empty() => PRESENT,
                _ => ABSENT,
            };
            (field.to_string(), score)
        })
        .collect();

    let mean = scores.values().sum::<f64>() / scores.len() as f64;

    ConfidenceReport {
        confidence_scores: scores,
        overall_confidence: (mean * 100.0).round() / 100.0,
        extraction_timestamp: Utc::now(),
    }
}
