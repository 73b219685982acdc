//! Prompts sent to the structuring model.

use crate::models::document::RawExtraction;

/// Shape the model must answer with. Mirrors [`StructuredInvoice`](crate::models::StructuredInvoice).
pub const INVOICE_SCHEMA: &str = r#"{
  "invoice_number": string | null,
  "invoice_date": "YYYY-MM-DD" | null,
  "due_date": "YYYY-MM-DD" | null,
  "vendor": {
    "name": string | null,
    "address": string | null,
    "phone": string | null,
    "email": string | null
  },
  "customer": {
    "name": string | null,
    "address": string | null
  },
  "items": [
    {
      "description": string | null,
      "quantity": number | null,
      "unit_price": number | null,
      "total": number | null
    }
  ],
  "subtotal": number | null,
  "tax_amount": number | null,
  "tax_percentage": number | null,
  "discount": number | null,
  "total": number | null,
  "currency": string | null,
  "payment_terms": string | null
}"#;

/// Prompt asking the model to fill the invoice schema from extracted content.
pub fn extraction_prompt(raw: &RawExtraction) -> String {
    let mut prompt = String::from(
        "You are an invoice data extraction engine.\n\
         \n\
         Rules:\n\
         - Use ONLY values that appear in the document text and tables below.\n\
         - Normalize every date to YYYY-MM-DD.\n\
         - Do NOT calculate totals, taxes or any derived value; copy numbers as printed.\n\
         - Do NOT guess. If a field is missing or unclear, use null.\n\
         - Line items come from the table rows when present.\n\
         - Output ONLY valid JSON matching the schema. No explanations, no markdown.\n\
         \n\
         Schema:\n",
    );
    prompt.push_str(INVOICE_SCHEMA);
    prompt.push_str("\n\nDOCUMENT TEXT:\n");
    prompt.push_str(raw.combined_text().trim());

    if !raw.table_candidates.is_empty() {
        prompt.push_str("\n\nTABLE ROWS (one JSON object per row, in document order):\n");
        for row in &raw.table_candidates {
            // TableRow serializes to a flat column map; this cannot fail.
            if let Ok(line) = serde_json::to_string(row) {
                prompt.push_str(&line);
                prompt.push('\n');
            }
        }
    }
    prompt
}

/// Prompt asking the model to fix JSON syntax only.
pub fn repair_prompt(broken: &str) -> String {
    format!(
        "You are a JSON repair engine. Fix the JSON below.\n\
         \n\
         Rules:\n\
         - Return ONLY valid JSON.\n\
         - Do NOT add new fields.\n\
         - Do NOT remove fields.\n\
         - Close all objects and arrays properly.\n\
         - No explanations.\n\
         \n\
         BROKEN JSON:\n{}",
        broken.trim()
    )
}
