//! End-to-end processing: document bytes in, structured invoice out.

use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info};

use crate::capability::{CapabilityResolver, SystemResolver};
use crate::error::{InvxError, Result};
use crate::extraction::ExtractionEngine;
use crate::models::config::{InvxConfig, RasterizerKind};
use crate::models::document::{RawExtraction, SourceDocument};
use crate::models::invoice::StructuredInvoice;
use crate::ocr::TextRecognizer;
use crate::pdf::{
    EmbeddedImageRasterizer, LatticeTableDetector, PageRasterizer, PdfTextLayer, PopplerRasterizer,
    TableDetector, TextLayer,
};
use crate::preprocess::Preprocessor;
use crate::router::DocumentRouter;
use crate::structuring::{GeminiModel, StructuredExtractor, StructuringModel};

/// Invoice processing pipeline.
///
/// Components are immutable and shared, so one pipeline can serve many
/// documents concurrently.
pub struct InvoicePipeline {
    engine: Arc<ExtractionEngine>,
    structurer: StructuredExtractor,
    concurrency: usize,
}

impl InvoicePipeline {
    /// Start building a pipeline from configuration.
    pub fn builder(config: InvxConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Route, extract and structure a single document.
    pub async fn process_document(&self, bytes: Vec<u8>, filename: &str) -> Result<StructuredInvoice> {
        let start = Instant::now();
        let raw = self.extract_raw(bytes, filename).await?;
        let path = raw.path;

        let mut invoice = self.structurer.extract(&raw).await?;
        let elapsed = start.elapsed().as_millis() as u64;
        if let Some(metadata) = invoice.metadata.as_mut() {
            metadata.source_path = Some(path);
            metadata.processing_time_ms = Some(elapsed);
        }

        info!("{}: processed via {} path in {} ms", filename, path, elapsed);
        Ok(invoice)
    }

    /// Route and extract without structuring.
    pub async fn extract_raw(&self, bytes: Vec<u8>, filename: &str) -> Result<RawExtraction> {
        let document = SourceDocument::new(bytes, filename)?;
        debug!(
            "{}: {:?}, {} bytes, {} page(s)",
            document.filename(),
            document.format(),
            document.byte_size(),
            document.page_count()
        );

        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.extract(&document))
            .await
            .map_err(|e| InvxError::Internal(format!("extraction worker failed: {}", e)))?
    }

    /// Process many documents, at most `batch.concurrency` at a time.
    ///
    /// Results are in input order; one failure never affects the others.
    pub async fn process_batch(&self, documents: Vec<(Vec<u8>, String)>) -> Vec<Result<StructuredInvoice>> {
        info!("Processing batch of {} document(s), concurrency {}", documents.len(), self.concurrency);
        stream::iter(documents)
            .map(|(bytes, filename)| async move { self.process_document(bytes, &filename).await })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

/// Assembles an [`InvoicePipeline`], defaulting every component not injected.
pub struct PipelineBuilder {
    config: InvxConfig,
    resolver: Option<Arc<dyn CapabilityResolver>>,
    recognizer: Option<Arc<dyn TextRecognizer>>,
    rasterizer: Option<Arc<dyn PageRasterizer>>,
    text_layer: Option<Arc<dyn TextLayer>>,
    table_detector: Option<Arc<dyn TableDetector>>,
    model: Option<Arc<dyn StructuringModel>>,
}

impl PipelineBuilder {
    pub fn new(config: InvxConfig) -> Self {
        Self {
            config,
            resolver: None,
            recognizer: None,
            rasterizer: None,
            text_layer: None,
            table_detector: None,
            model: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn CapabilityResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn with_text_layer(mut self, text_layer: Arc<dyn TextLayer>) -> Self {
        self.text_layer = Some(text_layer);
        self
    }

    pub fn with_table_detector(mut self, table_detector: Arc<dyn TableDetector>) -> Self {
        self.table_detector = Some(table_detector);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn StructuringModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Build the pipeline.
    ///
    /// Without an injected model, the Gemini model is created from the
    /// environment; a missing API key is a [`InvxError::Config`] error.
    pub fn build(mut self) -> Result<InvoicePipeline> {
        self.config.validate()?;
        let model: Arc<dyn StructuringModel> = match self.model.take() {
            Some(model) => model,
            None => Arc::new(GeminiModel::from_env(&self.config.structuring)?),
        };
        let structurer = StructuredExtractor::new(model, &self.config.structuring);
        let concurrency = self.config.batch.concurrency.max(1);

        Ok(InvoicePipeline {
            engine: Arc::new(self.build_engine()),
            structurer,
            concurrency,
        })
    }

    /// Build only the extraction stages; no model is needed.
    pub fn build_engine(self) -> ExtractionEngine {
        let config = self.config;
        let resolver: Arc<dyn CapabilityResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(SystemResolver::new(config.capabilities.clone())),
        };
        let recognizer: Arc<dyn TextRecognizer> = match self.recognizer {
            Some(recognizer) => recognizer,
            None => default_recognizer(&resolver, &config),
        };
        let rasterizer: Arc<dyn PageRasterizer> = match (self.rasterizer, config.pdf.rasterizer) {
            (Some(rasterizer), _) => rasterizer,
            (None, RasterizerKind::Poppler) => Arc::new(PopplerRasterizer::new(Arc::clone(&resolver))),
            (None, RasterizerKind::Embedded) => Arc::new(EmbeddedImageRasterizer::new()),
        };
        let text_layer: Arc<dyn TextLayer> = match self.text_layer {
            Some(text_layer) => text_layer,
            None => Arc::new(PdfTextLayer::new()),
        };
        let table_detector: Arc<dyn TableDetector> = match self.table_detector {
            Some(table_detector) => table_detector,
            None => Arc::new(LatticeTableDetector::new()),
        };

        ExtractionEngine::new(
            DocumentRouter::new(text_layer, config.pdf.min_text_chars),
            table_detector,
            rasterizer,
            recognizer,
            Preprocessor::new(config.preprocess.clone(), config.quality.clone()),
            config.quality.clone(),
            config.pdf.clone(),
        )
    }
}

#[cfg(feature = "native-ocr")]
fn default_recognizer(_resolver: &Arc<dyn CapabilityResolver>, config: &InvxConfig) -> Arc<dyn TextRecognizer> {
    Arc::new(crate::ocr::TesseractEngine::new(config.ocr.clone()))
}

#[cfg(not(feature = "native-ocr"))]
fn default_recognizer(resolver: &Arc<dyn CapabilityResolver>, config: &InvxConfig) -> Arc<dyn TextRecognizer> {
    Arc::new(crate::ocr::TesseractCli::new(Arc::clone(resolver), config.ocr.clone()))
}
