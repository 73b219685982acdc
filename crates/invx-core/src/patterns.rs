//! Common regex patterns shared by the extraction stages.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Numeric tokens with optional grouping / decimal separators: 2, 100.00, 1,234.50, 1.234,50
    pub static ref NUMBER_TOKEN: Regex = Regex::new(
        r"\d+(?:[.,]\d+)*"
    ).unwrap();

    // Object keys in (possibly broken) JSON text
    pub static ref JSON_KEY: Regex = Regex::new(
        r#""((?:[^"\\]|\\.)*)"\s*:"#
    ).unwrap();

    // Markdown code fence around a model answer
    pub static ref CODE_FENCE: Regex = Regex::new(
        r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```\s*$"
    ).unwrap();

    // Cell separators in table-mode OCR lines: pipes, tabs, or runs of 2+ spaces
    pub static ref TABLE_CELL_SEPARATOR: Regex = Regex::new(
        r"\s*\|\s*|\t+|\s{2,}"
    ).unwrap();

    // ISO calendar date
    pub static ref ISO_DATE: Regex = Regex::new(
        r"^\d{4}-\d{2}-\d{2}$"
    ).unwrap();
}
