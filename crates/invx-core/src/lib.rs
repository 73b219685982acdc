//! Core library for invoice extraction.
//!
//! This crate provides:
//! - Document routing between the PDF text layer and OCR
//! - Image quality analysis and adaptive preprocessing (with deskew)
//! - Text layer and ruled-table extraction for digital PDFs
//! - Two-mode OCR for scans through the tesseract command line
//! - Structuring with a generative model, one JSON repair pass,
//!   a no-invention guard on numbers and per-field confidence

pub mod capability;
pub mod error;
pub mod extraction;
pub mod models;
pub mod ocr;
pub mod patterns;
pub mod pdf;
pub mod pipeline;
pub mod preprocess;
pub mod quality;
pub mod router;
pub mod structuring;

pub use capability::{Capability, CapabilityResolver, CapabilityStatus, SystemResolver};
pub use error::{ErrorKind, InvxError, Result};
pub use extraction::ExtractionEngine;
pub use models::config::InvxConfig;
pub use models::document::{DocumentPath, RawExtraction, SourceDocument, TableRow};
pub use models::invoice::{Amount, ConfidenceReport, DateValue, InvoiceMetadata, LineItem, StructuredInvoice};
pub use ocr::{SegmentationMode, TextRecognizer};
pub use pipeline::{InvoicePipeline, PipelineBuilder};
pub use preprocess::{Preprocessor, Strategy};
pub use quality::{QualityAssessment, QualityMetrics};
pub use router::{DocumentRouter, Routing};
pub use structuring::{GeminiModel, StructuredExtractor, StructuringModel};
