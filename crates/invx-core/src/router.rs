//! Document classification: digital text layer or OCR.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::document::{DocumentFormat, DocumentPath, SourceDocument};
use crate::pdf::TextLayer;

/// Routing decision with what was learned while deciding.
#[derive(Debug, Clone, PartialEq)]
pub enum Routing {
    /// The PDF has a usable text layer; texts are per page, in order.
    Digital { page_texts: Vec<String> },
    /// The document must be rasterized and recognized.
    Scanned { reason: String },
}

impl Routing {
    pub fn path(&self) -> DocumentPath {
        match self {
            Routing::Digital { .. } => DocumentPath::Digital,
            Routing::Scanned { .. } => DocumentPath::Scanned,
        }
    }
}

/// Chooses the extraction path for a document.
pub struct DocumentRouter {
    text_layer: Arc<dyn TextLayer>,
    min_text_chars: usize,
}

impl DocumentRouter {
    pub fn new(text_layer: Arc<dyn TextLayer>, min_text_chars: usize) -> Self {
        Self {
            text_layer,
            min_text_chars: min_text_chars.max(1),
        }
    }

    /// Decide the path, keeping the text layer when one was found.
    ///
    /// Never fails: a PDF whose text layer cannot be read is routed to OCR.
    pub fn classify(&self, document: &SourceDocument) -> Routing {
        if let DocumentFormat::Image(kind) = document.format() {
            debug!("{}: {:?} image, routing to OCR", document.filename(), kind);
            return Routing::Scanned {
                reason: "raster image".to_string(),
            };
        }

        let page_texts = match self.text_layer.page_texts(document.bytes()) {
            Ok(texts) => texts,
            Err(e) => {
                warn!("{}: text layer unreadable, falling back to OCR: {}", document.filename(), e);
                return Routing::Scanned {
                    reason: format!("text layer unreadable: {}", e),
                };
            }
        };

        let has_text = page_texts.iter().any(|page| {
            page.chars().filter(|c| !c.is_whitespace()).count() >= self.min_text_chars
        });

        if has_text {
            debug!("{}: digital PDF with {} page(s)", document.filename(), page_texts.len());
            Routing::Digital { page_texts }
        } else {
            debug!("{}: no text layer, routing to OCR", document.filename());
            Routing::Scanned {
                reason: "no text layer".to_string(),
            }
        }
    }

    /// The path only.
    pub fn route(&self, document: &SourceDocument) -> DocumentPath {
        self.classify(document).path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PdfError;
    use crate::pdf::PdfTextLayer;
    use crate::pdf::fixtures::{PageSpec, build_pdf};

    struct BrokenLayer;

    impl TextLayer for BrokenLayer {
        fn page_texts(&self, _data: &[u8]) -> crate::pdf::Result<Vec<String>> {
            Err(PdfError::TextExtraction("bad xref".to_string()))
        }
    }

    fn router() -> DocumentRouter {
        DocumentRouter::new(Arc::new(PdfTextLayer::new()), 1)
    }

    #[test]
    fn test_text_pdf_is_digital() {
        let data = build_pdf(vec![PageSpec::text(&["Invoice #INV-100"])]);
        let doc = SourceDocument::new(data, "a.pdf").unwrap();
        match router().classify(&doc) {
            Routing::Digital { page_texts } => assert!(page_texts[0].contains("INV-100")),
            other => panic!("expected digital, got {:?}", other),
        }
    }

    #[test]
    fn test_whitespace_only_pdf_is_scanned() {
        let data = build_pdf(vec![PageSpec::text(&["   "])]);
        let doc = SourceDocument::new(data, "a.pdf").unwrap();
        assert_eq!(router().route(&doc), DocumentPath::Scanned);
    }

    #[test]
    fn test_unreadable_text_layer_falls_back() {
        let data = build_pdf(vec![PageSpec::text(&["Invoice"])]);
        let doc = SourceDocument::new(data, "a.pdf").unwrap();
        let router = DocumentRouter::new(Arc::new(BrokenLayer), 1);
        match router.classify(&doc) {
            Routing::Scanned { reason } => assert!(reason.contains("bad xref")),
            other => panic!("expected scanned, got {:?}", other),
        }
    }

    #[test]
    fn test_image_is_scanned() {
        let img = image::GrayImage::from_pixel(8, 8, image::Luma([255]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        let doc = SourceDocument::new(buf.into_inner(), "scan.png").unwrap();
        assert_eq!(router().route(&doc), DocumentPath::Scanned);
    }
}
