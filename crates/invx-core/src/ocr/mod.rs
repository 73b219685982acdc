//! Optical character recognition.
//!
//! Recognition itself is delegated to Tesseract behind [`TextRecognizer`]:
//! in-process through the `tesseract` crate with the `native-ocr` feature,
//! otherwise through the command-line tool. This module owns the two
//! recognition modes and the conversion of table-mode output into row
//! candidates.

#[cfg(feature = "native-ocr")]
mod native;
mod tesseract;

#[cfg(feature = "native-ocr")]
pub use native::TesseractEngine;
pub use tesseract::TesseractCli;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::{InvxError, OcrError};
use crate::models::config::OcrConfig;
use crate::models::document::TableRow;
use crate::patterns::TABLE_CELL_SEPARATOR;

/// Whether pages are recognized in-process rather than by the `tesseract` binary.
pub const NATIVE_ENGINE: bool = cfg!(feature = "native-ocr");

/// How the recognizer should segment the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    /// Fully automatic layout analysis; headers, addresses, metadata.
    Prose,
    /// A single uniform block; keeps table rows on one line.
    Table,
}

/// Tesseract page segmentation mode (`--psm`) configured for `mode`.
pub fn page_segmentation(config: &OcrConfig, mode: SegmentationMode) -> u8 {
    match mode {
        SegmentationMode::Prose => config.prose_psm,
        SegmentationMode::Table => config.table_psm,
    }
}

/// Failure of a single recognition call.
#[derive(Debug)]
pub enum RecognitionFailure {
    /// The engine is not usable at all; retrying other pages is pointless.
    Unavailable(InvxError),
    /// This page failed; other pages may still succeed.
    Page(OcrError),
}

impl From<OcrError> for RecognitionFailure {
    fn from(err: OcrError) -> Self {
        RecognitionFailure::Page(err)
    }
}

/// Recognizes text in a preprocessed page.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &GrayImage, mode: SegmentationMode) -> Result<String, RecognitionFailure>;
}

/// Split table-mode OCR text into rows of at least two cells.
///
/// Cells are separated by pipes, tabs or runs of two or more spaces.
/// Columns are positional (`col_1`, `col_2`, ...).
pub fn table_rows_from_text(text: &str, page: u32) -> Vec<TableRow> {
    text.lines()
        .filter_map(|line| {
            let cells: Vec<String> = TABLE_CELL_SEPARATOR
                .split(line.trim().trim_matches('|'))
                .map(|cell| cell.trim().to_string())
                .filter(|cell| !cell.is_empty())
                .collect();
            (cells.len() >= 2).then(|| TableRow::from_values(page, 0, None, cells))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_page_segmentation_per_mode() {
        let mut config = OcrConfig::default();
        assert_eq!(page_segmentation(&config, SegmentationMode::Prose), 3);
        assert_eq!(page_segmentation(&config, SegmentationMode::Table), 6);

        config.table_psm = 4;
        assert_eq!(page_segmentation(&config, SegmentationMode::Table), 4);
    }

    #[test]
    fn test_table_rows_from_text() {
        let text = "INVOICE ITEMS\n\
                    Widget    2    100.00    200.00\n\
                    | Gadget | 1 | 50.00 | 50.00 |\n\
                    \n\
                    Thank you";
        let rows = table_rows_from_text(text, 3);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].page, 3);
        assert_eq!(
            rows[0].values().collect::<Vec<_>>(),
            vec!["Widget", "2", "100.00", "200.00"]
        );
        assert_eq!(rows[1].get("col_1"), Some("Gadget"));
        assert_eq!(rows[1].get("col_4"), Some("50.00"));
    }
}
