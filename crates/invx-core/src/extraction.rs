//! Raw text and table extraction for both document paths.

use std::sync::Arc;

use image::DynamicImage;
use tracing::{debug, info, warn};

use crate::error::{InvxError, PdfError, Result};
use crate::models::config::{PdfConfig, QualityThresholds};
use crate::models::document::{DocumentFormat, DocumentPath, RawExtraction, SourceDocument, TableRow};
use crate::ocr::{RecognitionFailure, SegmentationMode, TextRecognizer, table_rows_from_text};
use crate::pdf::{PageRasterizer, TableDetector};
use crate::preprocess::Preprocessor;
use crate::quality;
use crate::router::{DocumentRouter, Routing};

/// Text recognized on one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageText {
    pub prose: String,
    pub table: String,
}

impl PageText {
    fn is_empty(&self) -> bool {
        self.prose.trim().is_empty() && self.table.trim().is_empty()
    }
}

/// Runs the digital or OCR path and produces a [`RawExtraction`].
pub struct ExtractionEngine {
    router: DocumentRouter,
    tables: Arc<dyn TableDetector>,
    rasterizer: Arc<dyn PageRasterizer>,
    recognizer: Arc<dyn TextRecognizer>,
    preprocessor: Preprocessor,
    thresholds: QualityThresholds,
    pdf: PdfConfig,
}

impl ExtractionEngine {
    pub fn new(
        router: DocumentRouter,
        tables: Arc<dyn TableDetector>,
        rasterizer: Arc<dyn PageRasterizer>,
        recognizer: Arc<dyn TextRecognizer>,
        preprocessor: Preprocessor,
        thresholds: QualityThresholds,
        pdf: PdfConfig,
    ) -> Self {
        Self {
            router,
            tables,
            rasterizer,
            recognizer,
            preprocessor,
            thresholds,
            pdf,
        }
    }

    /// Route the document and extract its raw content.
    ///
    /// A failing digital path is retried through OCR; the reason is kept in
    /// the extraction's warnings.
    pub fn extract(&self, document: &SourceDocument) -> Result<RawExtraction> {
        match self.router.classify(document) {
            Routing::Digital { page_texts } => match self.extract_digital(document, page_texts) {
                Ok(raw) => Ok(raw),
                Err(e) => {
                    warn!("{}: digital extraction failed, using OCR: {}", document.filename(), e);
                    let mut raw = self.extract_scanned(document)?;
                    raw.warnings
                        .insert(0, format!("digital extraction failed, fell back to OCR: {}", e));
                    Ok(raw)
                }
            },
            Routing::Scanned { reason } => {
                debug!("{}: OCR path ({})", document.filename(), reason);
                self.extract_scanned(document)
            }
        }
    }

    fn extract_digital(
        &self,
        document: &SourceDocument,
        page_texts: Vec<String>,
    ) -> std::result::Result<RawExtraction, PdfError> {
        let table_candidates = self.tables.detect(document.bytes())?;
        let pages = page_texts.len();
        let prose_text = join_pages(page_texts.iter().map(String::as_str));

        info!(
            "{}: digital extraction, {} page(s), {} table row(s)",
            document.filename(),
            pages,
            table_candidates.len()
        );

        Ok(RawExtraction {
            path: DocumentPath::Digital,
            pages,
            prose_text,
            table_text: String::new(),
            table_candidates,
            warnings: Vec::new(),
        })
    }

    fn extract_scanned(&self, document: &SourceDocument) -> Result<RawExtraction> {
        let mut pages = self.page_images(document)?;
        if self.pdf.max_pages > 0 && pages.len() > self.pdf.max_pages {
            debug!("Limiting OCR to the first {} of {} pages", self.pdf.max_pages, pages.len());
            pages.truncate(self.pdf.max_pages);
        }

        let mut warnings = Vec::new();
        let mut texts = Vec::with_capacity(pages.len());
        let mut table_candidates: Vec<TableRow> = Vec::new();

        for (index, page) in pages.iter().enumerate() {
            let number = index as u32 + 1;
            let text = match page {
                Some(image) => self.ocr_page(image, number, &mut warnings)?,
                None => {
                    warn!("Page {} could not be rendered", number);
                    warnings.push(format!("page {} could not be rendered", number));
                    PageText::default()
                }
            };
            table_candidates.extend(table_rows_from_text(&text.table, number));
            texts.push(text);
        }

        let raw = RawExtraction {
            path: DocumentPath::Scanned,
            pages: pages.len(),
            prose_text: join_pages(texts.iter().map(|t| t.prose.as_str())),
            table_text: join_pages(texts.iter().map(|t| t.table.as_str())),
            table_candidates,
            warnings,
        };
        if raw.is_empty() {
            return Err(InvxError::EmptyExtraction { pages: raw.pages });
        }

        info!(
            "{}: OCR extraction, {} page(s), {} table row(s)",
            document.filename(),
            raw.pages,
            raw.table_candidates.len()
        );
        Ok(raw)
    }

    fn page_images(&self, document: &SourceDocument) -> Result<Vec<Option<DynamicImage>>> {
        match document.format() {
            DocumentFormat::Image(kind) => {
                match image::load_from_memory_with_format(document.bytes(), kind.image_format()) {
                    Ok(image) => Ok(vec![Some(image)]),
                    Err(e) => {
                        warn!("{}: image could not be decoded: {}", document.filename(), e);
                        Ok(vec![None])
                    }
                }
            }
            DocumentFormat::Pdf => self.rasterizer.rasterize(document.bytes(), self.pdf.render_dpi),
        }
    }

    /// Analyze, preprocess and recognize one page in both modes.
    ///
    /// Blank pages and per-page recognition errors yield an empty page; an
    /// unavailable recognizer fails the whole extraction.
    pub fn ocr_page(&self, image: &DynamicImage, number: u32, warnings: &mut Vec<String>) -> Result<PageText> {
        let metrics = quality::analyze(image);
        if quality::is_blank(&metrics, &self.thresholds) {
            debug!("Page {} is blank (contrast {:.2}), skipping", number, metrics.contrast);
            return Ok(PageText::default());
        }

        let page = self.preprocessor.preprocess(image, &metrics);
        debug!(
            "Page {}: {:?} preprocessing ({}), deskew {:.2}°",
            number,
            page.strategy,
            page.assessment.reasons.join(", "),
            page.deskew_angle
        );

        let mut text = PageText::default();
        for mode in [SegmentationMode::Prose, SegmentationMode::Table] {
            let recognized = match self.recognizer.recognize(&page.image, mode) {
                Ok(recognized) => recognized,
                Err(RecognitionFailure::Unavailable(err)) => return Err(err),
                Err(RecognitionFailure::Page(err)) => {
                    warn!("Page {} {:?} recognition failed: {}", number, mode, err);
                    warnings.push(format!("page {} {:?} recognition failed: {}", number, mode, err));
                    String::new()
                }
            };
            match mode {
                SegmentationMode::Prose => text.prose = recognized,
                SegmentationMode::Table => text.table = recognized,
            }
        }
        if text.is_empty() {
            debug!("Page {} produced no text", number);
        }
        Ok(text)
    }
}

fn join_pages<'a>(pages: impl Iterator<Item = &'a str>) -> String {
    pages
        .map(str::trim)
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
