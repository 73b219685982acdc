//! Data models: configuration, documents and the invoice schema.

pub mod config;
pub mod document;
pub mod invoice;

pub use config::InvxConfig;
pub use document::{DocumentFormat, DocumentPath, ImageKind, RawExtraction, SourceDocument, TableRow};
pub use invoice::{
    Amount, ConfidenceReport, Customer, DateValue, InvoiceMetadata, LineItem, StructuredInvoice,
    Vendor,
};
