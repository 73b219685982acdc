//! Error types for the invx-core library.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Main error type for the invx library.
#[derive(Error, Debug)]
pub enum InvxError {
    /// Input is neither a PDF nor a supported raster image.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// A required external capability is missing.
    #[error("{capability} is not available: {reason}\n{remediation}")]
    ConversionDependency {
        capability: String,
        reason: String,
        remediation: String,
    },

    /// Every page produced empty text and no table candidates.
    #[error("no text could be extracted from any of the {pages} page(s)")]
    EmptyExtraction { pages: usize },

    /// The structuring model output could not be turned into an invoice.
    #[error("structuring failed: {0}")]
    StructuringFailed(String),

    /// The structuring model did not answer in time.
    #[error("structuring model did not respond within {0:?}")]
    StructuringTimeout(Duration),

    /// PDF processing error.
    #[error("PDF error: {0}")]
    Pdf(#[from] PdfError),

    /// OCR processing error.
    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    /// Structuring model transport error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Image processing error.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A blocking worker panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable classification of [`InvxError`] for callers that branch on failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    UnsupportedFormat,
    ConversionDependency,
    EmptyExtraction,
    StructuringFailed,
    StructuringTimeout,
    Config,
    Internal,
}

impl ErrorKind {
    /// Snake-case name, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::ConversionDependency => "conversion_dependency",
            ErrorKind::EmptyExtraction => "empty_extraction",
            ErrorKind::StructuringFailed => "structuring_failed",
            ErrorKind::StructuringTimeout => "structuring_timeout",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl InvxError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            InvxError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            InvxError::ConversionDependency { .. } => ErrorKind::ConversionDependency,
            InvxError::EmptyExtraction { .. } => ErrorKind::EmptyExtraction,
            InvxError::StructuringFailed(_) | InvxError::Model(_) => ErrorKind::StructuringFailed,
            InvxError::StructuringTimeout(_) => ErrorKind::StructuringTimeout,
            InvxError::Config(_) => ErrorKind::Config,
            InvxError::Pdf(_)
            | InvxError::Ocr(_)
            | InvxError::Image(_)
            | InvxError::Io(_)
            | InvxError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Errors related to PDF processing.
#[derive(Error, Debug)]
pub enum PdfError {
    /// Failed to open/parse the PDF file.
    #[error("failed to parse PDF: {0}")]
    Parse(String),

    /// Failed to extract text from PDF.
    #[error("failed to extract text: {0}")]
    TextExtraction(String),

    /// Failed to detect tables in a page.
    #[error("failed to detect tables: {0}")]
    TableDetection(String),

    /// Failed to rasterize pages.
    #[error("failed to render pages: {0}")]
    Render(String),

    /// The PDF is encrypted and cannot be processed.
    #[error("PDF is encrypted")]
    Encrypted,

    /// The PDF is empty or has no pages.
    #[error("PDF has no pages")]
    NoPages,
}

/// Errors related to OCR processing.
#[derive(Error, Debug)]
pub enum OcrError {
    /// The recognizer binary could not be started.
    #[error("failed to launch recognizer: {0}")]
    Launch(String),

    /// Text recognition failed.
    #[error("text recognition failed: {0}")]
    Recognition(String),

    /// Invalid image format or dimensions.
    #[error("invalid image: {0}")]
    InvalidImage(String),
}

/// Errors from the structuring model transport.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The model endpoint could not be reached.
    #[error("request failed: {0}")]
    Request(String),

    /// The model endpoint answered with an error status.
    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The response envelope did not contain generated text.
    #[error("malformed model response: {0}")]
    Response(String),
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Request(err.to_string())
    }
}

/// Result type for the invx library.
pub type Result<T> = std::result::Result<T, InvxError>;
