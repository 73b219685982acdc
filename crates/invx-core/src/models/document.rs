//! Input documents and the raw extraction produced from them.

use std::path::Path;
use std::sync::Arc;

use image::ImageFormat;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::debug;

use crate::error::{InvxError, Result};

/// Raster formats accepted on the image path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Png,
    Jpeg,
    Tiff,
    Bmp,
    Webp,
}

impl ImageKind {
    fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Png => Some(ImageKind::Png),
            ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            ImageFormat::Tiff => Some(ImageKind::Tiff),
            ImageFormat::Bmp => Some(ImageKind::Bmp),
            ImageFormat::WebP => Some(ImageKind::Webp),
            _ => None,
        }
    }

    /// Matching decoder format.
    pub fn image_format(&self) -> ImageFormat {
        match self {
            ImageKind::Png => ImageFormat::Png,
            ImageKind::Jpeg => ImageFormat::Jpeg,
            ImageKind::Tiff => ImageFormat::Tiff,
            ImageKind::Bmp => ImageFormat::Bmp,
            ImageKind::Webp => ImageFormat::WebP,
        }
    }
}

/// Container format of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "kind")]
pub enum DocumentFormat {
    Pdf,
    Image(ImageKind),
}

/// Extraction path chosen for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentPath {
    /// The PDF carries a usable text layer.
    Digital,
    /// The document goes through rasterization and OCR.
    Scanned,
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentPath::Digital => f.write_str("digital"),
            DocumentPath::Scanned => f.write_str("scanned"),
        }
    }
}

/// Immutable handle to the bytes of one input document.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    bytes: Arc<[u8]>,
    filename: String,
    format: DocumentFormat,
    page_count: usize,
}

impl SourceDocument {
    /// Wrap raw bytes, sniffing the format from content.
    ///
    /// The filename extension is only a hint; a `.pdf` holding PNG bytes is
    /// treated as a PNG.
    pub fn new(bytes: impl Into<Arc<[u8]>>, filename: impl Into<String>) -> Result<Self> {
        let bytes = bytes.into();
        let filename = filename.into();
        let format = sniff_format(&bytes).ok_or_else(|| {
            InvxError::UnsupportedFormat(format!(
                "{} is neither a PDF nor a supported image",
                if filename.is_empty() { "input" } else { filename.as_str() }
            ))
        })?;

        if let Some(hint) = extension_hint(&filename) {
            if hint != format {
                debug!("{}: extension suggests {:?} but content is {:?}", filename, hint, format);
            }
        }

        let page_count = match format {
            DocumentFormat::Pdf => lopdf::Document::load_mem(&bytes)
                .map(|doc| doc.get_pages().len())
                .unwrap_or(0),
            DocumentFormat::Image(_) => 1,
        };

        Ok(Self {
            bytes,
            filename,
            format,
            page_count,
        })
    }

    /// Raw document bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Filename claimed by the caller.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Sniffed container format.
    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// Number of pages; 0 when a PDF page tree could not be read.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Size in bytes.
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_pdf(&self) -> bool {
        self.format == DocumentFormat::Pdf
    }
}

fn sniff_format(bytes: &[u8]) -> Option<DocumentFormat> {
    // Some producers emit a few junk bytes before the header.
    let head = &bytes[..bytes.len().min(1024)];
    if head.windows(5).any(|w| w == b"%PDF-") {
        return Some(DocumentFormat::Pdf);
    }
    image::guess_format(bytes)
        .ok()
        .and_then(ImageKind::from_image_format)
        .map(DocumentFormat::Image)
}

fn extension_hint(filename: &str) -> Option<DocumentFormat> {
    let ext = Path::new(filename).extension()?.to_str()?.to_lowercase();
    if ext == "pdf" {
        return Some(DocumentFormat::Pdf);
    }
    ImageFormat::from_extension(&ext)
        .and_then(ImageKind::from_image_format)
        .map(DocumentFormat::Image)
}

/// One row of a detected table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    /// Page number (1-indexed).
    pub page: u32,
    /// Index of the table on its page.
    pub table_index: usize,
    /// Ordered (column, value) pairs.
    pub cells: Vec<(String, String)>,
}

impl TableRow {
    /// Build a row from header names and values; missing headers become `col_N`.
    pub fn from_values(page: u32, table_index: usize, header: Option<&[String]>, values: Vec<String>) -> Self {
        let cells = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| {
                let column = header
                    .and_then(|h| h.get(i))
                    .filter(|name| !name.trim().is_empty())
                    .cloned()
                    .unwrap_or_else(|| format!("col_{}", i + 1));
                (column, value)
            })
            .collect();
        Self {
            page,
            table_index,
            cells,
        }
    }

    /// Value of a named column.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(_, value)| value.as_str())
    }
}

impl Serialize for TableRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (column, value) in &self.cells {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Unstructured output of either extraction path.
#[derive(Debug, Clone, Serialize)]
pub struct RawExtraction {
    /// Path that produced this extraction.
    pub path: DocumentPath,
    /// Number of pages considered.
    pub pages: usize,
    /// Running text, pages in order.
    pub prose_text: String,
    /// Table-mode OCR output; empty on the digital path.
    pub table_text: String,
    /// Table rows in document order.
    pub table_candidates: Vec<TableRow>,
    /// Recoverable problems met while extracting.
    pub warnings: Vec<String>,
}

impl RawExtraction {
    /// True when no text and no table rows were found.
    pub fn is_empty(&self) -> bool {
        self.prose_text.trim().is_empty()
            && self.table_text.trim().is_empty()
            && self.table_candidates.is_empty()
    }

    /// Combined text handed to the structuring model.
    pub fn combined_text(&self) -> String {
        if self.table_text.trim().is_empty() {
            return self.prose_text.clone();
        }
        format!(
            "===== HEADER & METADATA =====\n{}\n\n===== LINE ITEMS TABLE =====\n{}",
            self.prose_text.trim_end(),
            self.table_text.trim_end()
        )
    }
}
