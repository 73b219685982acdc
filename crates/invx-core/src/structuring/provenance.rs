//! Guard against numbers the model did not read from the document.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use tracing::warn;

use crate::models::document::RawExtraction;
use crate::models::invoice::{Amount, StructuredInvoice, parse_decimal};
use crate::patterns::NUMBER_TOKEN;

/// The closed set of numbers printed in an extraction.
#[derive(Debug, Clone, Default)]
pub struct NumberSet {
    numbers: BTreeSet<Decimal>,
}

impl NumberSet {
    /// Numbers in the prose, the table text and every table cell.
    pub fn from_extraction(raw: &RawExtraction) -> Self {
        let mut set = Self::default();
        set.collect(&raw.prose_text);
        set.collect(&raw.table_text);
        for row in &raw.table_candidates {
            for value in row.values() {
                set.collect(value);
            }
        }
        set
    }

    fn collect(&mut self, text: &str) {
        for token in NUMBER_TOKEN.find_iter(text) {
            let token = token.as_str();
            if let Some(value) = parse_decimal(token) {
                self.numbers.insert(value.normalize());
            }
            // "1.234" reads as 1.234 but may be printed thousands.
            if let Some((_, last)) = token.rsplit_once(['.', ',']) {
                if last.len() == 3 {
                    let digits: String = token.chars().filter(char::is_ascii_digit).collect();
                    if let Ok(value) = digits.parse::<Decimal>() {
                        self.numbers.insert(value.normalize());
                    }
                }
            }
        }
    }

    /// Membership ignoring sign and trailing zeros.
    pub fn contains(&self, value: Decimal) -> bool {
        self.numbers.contains(&value.abs().normalize())
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }

    fn admits(&self, amount: &Amount) -> bool {
        match amount {
            Amount::Value(value) => self.contains(*value),
            Amount::Unparsed(raw) => NUMBER_TOKEN
                .find_iter(raw)
                .filter_map(|token| parse_decimal(token.as_str()))
                .all(|value| self.contains(value)),
        }
    }

    /// Null every numeric field whose value is not in the set.
    ///
    /// Returns one warning per removed value.
    pub fn enforce(&self, invoice: &mut StructuredInvoice) -> Vec<String> {
        let mut warnings = Vec::new();

        let totals = [
            ("subtotal", &mut invoice.subtotal),
            ("tax_amount", &mut invoice.tax_amount),
            ("tax_percentage", &mut invoice.tax_percentage),
            ("discount", &mut invoice.discount),
            ("total", &mut invoice.total),
        ];
        for (field, slot) in totals {
            self.check(field.to_string(), slot, &mut warnings);
        }

        for (index, item) in invoice.items.iter_mut().enumerate() {
            let fields = [
                ("quantity", &mut item.quantity),
                ("unit_price", &mut item.unit_price),
                ("total", &mut item.total),
            ];
            for (field, slot) in fields {
                self.check(format!("items[{}].{}", index, field), slot, &mut warnings);
            }
        }

        warnings
    }

    fn check(&self, field: String, slot: &mut Option<Amount>, warnings: &mut Vec<String>) {
        let Some(amount) = slot.as_ref() else {
            return;
        };
        if self.admits(amount) {
            return;
        }
        warn!("{} = {} does not appear in the document, discarding", field, amount);
        warnings.push(format!("{}: value {} not found in document, set to null", field, amount));
        *slot = None;
    }
}
