//! Native text-layer extraction using pdf-extract.

use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, warn};

use super::{Result, TextLayer, load};
use crate::error::PdfError;

/// Per-page text extraction backed by `pdf-extract`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfTextLayer;

impl PdfTextLayer {
    pub fn new() -> Self {
        Self
    }
}

impl TextLayer for PdfTextLayer {
    fn page_texts(&self, data: &[u8]) -> Result<Vec<String>> {
        let loaded = load(data)?;
        let page_count = loaded.document.get_pages().len();

        // pdf-extract panics on some malformed font programs.
        let extracted = catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(&loaded.raw_data)
        }))
        .map_err(|_| {
            warn!("Text layer decoder panicked");
            PdfError::TextExtraction("text layer decoder panicked".to_string())
        })?
        .map_err(|e| PdfError::TextExtraction(e.to_string()))?;

        debug!(
            "Extracted text layer of {} page(s), {} chars",
            page_count,
            extracted.iter().map(|p| p.len()).sum::<usize>()
        );
        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::{PageSpec, build_pdf};

    #[test]
    fn test_pages_in_order() {
        let data = build_pdf(vec![
            PageSpec::text(&["Invoice #INV-7"]),
            PageSpec::text(&["Total: 12.00"]),
        ]);
        let pages = PdfTextLayer::new().page_texts(&data).unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].contains("INV-7"));
        assert!(pages[1].contains("12.00"));
    }

    #[test]
    fn test_page_without_text_is_empty() {
        let data = build_pdf(vec![PageSpec {
            texts: vec![],
            rules: vec![(10.0, 10.0, 100.0, 10.0)],
        }]);
        let pages = PdfTextLayer::new().page_texts(&data).unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].trim().is_empty());
    }

    #[test]
    fn test_malformed_pdf_is_error() {
        assert!(PdfTextLayer::new().page_texts(b"%PDF-1.7 garbage").is_err());
    }
}
