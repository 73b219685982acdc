//! PDF processing: text layer, ruled-table detection and page rasterization.

mod raster;
mod tables;
mod text;

pub use raster::{EmbeddedImageRasterizer, PopplerRasterizer};
pub use tables::LatticeTableDetector;
pub use text::PdfTextLayer;

use image::DynamicImage;
use lopdf::Document;
use tracing::debug;

use crate::error::{InvxError, PdfError};
use crate::models::document::TableRow;

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;

/// Machine-readable text layer of a PDF.
pub trait TextLayer: Send + Sync {
    /// Text of every page, in page order.
    fn page_texts(&self, data: &[u8]) -> Result<Vec<String>>;
}

/// Detector for tables drawn in a PDF.
pub trait TableDetector: Send + Sync {
    /// Rows of every detected table, in document order.
    fn detect(&self, data: &[u8]) -> Result<Vec<TableRow>>;
}

/// Renders pages of a PDF to raster images.
pub trait PageRasterizer: Send + Sync {
    /// One entry per page; `None` when a page could not be rendered.
    ///
    /// Fails with [`InvxError::ConversionDependency`] when the backing tool is
    /// missing, since no page could ever be rendered.
    fn rasterize(&self, data: &[u8], dpi: u32) -> std::result::Result<Vec<Option<DynamicImage>>, InvxError>;
}

/// A parsed, decrypted PDF plus the bytes downstream decoders should read.
pub(crate) struct LoadedPdf {
    pub document: Document,
    pub raw_data: Vec<u8>,
}

/// Parse a PDF, decrypting documents protected by an empty user password.
pub(crate) fn load(data: &[u8]) -> Result<LoadedPdf> {
    let mut document = Document::load_mem(data).map_err(|e| PdfError::Parse(e.to_string()))?;

    let raw_data = if document.is_encrypted() {
        if document.decrypt("").is_err() {
            return Err(PdfError::Encrypted);
        }
        debug!("Decrypted PDF with empty password");

        let mut decrypted = Vec::new();
        document
            .save_to(&mut decrypted)
            .map_err(|e| PdfError::Parse(format!("failed to save decrypted PDF: {}", e)))?;
        decrypted
    } else {
        data.to_vec()
    };

    if document.get_pages().is_empty() {
        return Err(PdfError::NoPages);
    }

    Ok(LoadedPdf { document, raw_data })
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Small PDFs assembled with lopdf for tests.

    use lopdf::content::{Content, Operation};
    use lopdf::{Document, Object, Stream, dictionary};

    /// A page description: text runs `(x, y, text)` and ruling segments `(x1, y1, x2, y2)`.
    #[derive(Default)]
    pub struct PageSpec {
        pub texts: Vec<(f32, f32, String)>,
        pub rules: Vec<(f32, f32, f32, f32)>,
    }

    impl PageSpec {
        pub fn text(lines: &[&str]) -> Self {
            Self {
                texts: lines
                    .iter()
                    .enumerate()
                    .map(|(i, line)| (50.0, 750.0 - 20.0 * i as f32, line.to_string()))
                    .collect(),
                rules: Vec::new(),
            }
        }
    }

    /// Build a PDF with Courier text and stroked rulings.
    pub fn build_pdf(pages: Vec<PageSpec>) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids = Vec::new();
        for spec in pages {
            let mut operations = Vec::new();
            for (x1, y1, x2, y2) in &spec.rules {
                operations.push(Operation::new("m", vec![(*x1).into(), (*y1).into()]));
                operations.push(Operation::new("l", vec![(*x2).into(), (*y2).into()]));
                operations.push(Operation::new("S", vec![]));
            }
            for (x, y, text) in &spec.texts {
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new("Tf", vec!["F1".into(), 10.into()]));
                operations.push(Operation::new("Td", vec![(*x).into(), (*y).into()]));
                operations.push(Operation::new("Tj", vec![Object::string_literal(text.as_str())]));
                operations.push(Operation::new("ET", vec![]));
            }
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(
                dictionary! {},
                content.encode().unwrap_or_default(),
            ));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => resources_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    /// A ruled table whose first row is the header; columns sit between the given x edges.
    pub fn ruled_table(
        top: f32,
        row_height: f32,
        column_edges: &[f32],
        rows: &[&[&str]],
    ) -> PageSpec {
        let mut texts = Vec::new();
        let mut rules = Vec::new();
        let left = column_edges[0];
        let right = column_edges[column_edges.len() - 1];
        let bottom = top - row_height * rows.len() as f32;

        for i in 0..=rows.len() {
            let y = top - row_height * i as f32;
            rules.push((left, y, right, y));
        }
        for x in column_edges {
            rules.push((*x, top, *x, bottom));
        }
        for (r, row) in rows.iter().enumerate() {
            let baseline = top - row_height * (r as f32 + 1.0) + 6.0;
            for (c, value) in row.iter().enumerate() {
                texts.push((column_edges[c] + 4.0, baseline, value.to_string()));
            }
        }
        PageSpec { texts, rules }
    }
}
