//! Tesseract command-line recognizer, used when the library binding is not built in.

use std::process::Command;
use std::sync::Arc;

use image::{GrayImage, ImageFormat};
use tracing::trace;

use super::{RecognitionFailure, SegmentationMode, TextRecognizer, page_segmentation};
use crate::capability::{Capability, CapabilityResolver};
use crate::error::{InvxError, OcrError};
use crate::models::config::OcrConfig;

/// Runs the `tesseract` binary on each page.
pub struct TesseractCli {
    resolver: Arc<dyn CapabilityResolver>,
    config: OcrConfig,
}

impl TesseractCli {
    pub fn new(resolver: Arc<dyn CapabilityResolver>, config: OcrConfig) -> Self {
        Self { resolver, config }
    }

    /// Arguments after the input path.
    fn arguments(&self, mode: SegmentationMode) -> Vec<String> {
        vec![
            "stdout".to_string(),
            "--oem".to_string(),
            self.config.engine_mode.to_string(),
            "--psm".to_string(),
            page_segmentation(&self.config, mode).to_string(),
            "-l".to_string(),
            self.config.language.clone(),
        ]
    }
}

impl TextRecognizer for TesseractCli {
    fn recognize(&self, image: &GrayImage, mode: SegmentationMode) -> Result<String, RecognitionFailure> {
        let binary = self
            .resolver
            .resolve(Capability::Tesseract)
            .require(Capability::Tesseract)
            .map_err(RecognitionFailure::Unavailable)?;

        if image.width() == 0 || image.height() == 0 {
            return Err(OcrError::InvalidImage("empty page".to_string()).into());
        }

        let input = tempfile::Builder::new()
            .prefix("invx-page-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| OcrError::Recognition(e.to_string()))?;
        image
            .save_with_format(input.path(), ImageFormat::Png)
            .map_err(|e| OcrError::Recognition(e.to_string()))?;

        let output = Command::new(&binary)
            .arg(input.path())
            .args(self.arguments(mode))
            .output()
            .map_err(|e| {
                RecognitionFailure::Unavailable(InvxError::ConversionDependency {
                    capability: Capability::Tesseract.to_string(),
                    reason: format!("failed to run {}: {}", binary.display(), e),
                    remediation: Capability::Tesseract.remediation().to_string(),
                })
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Launch(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            ))
            .into());
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        trace!("tesseract ({:?}) returned {} chars", mode, text.len());
        Ok(text)
    }
}
