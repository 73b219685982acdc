//! In-process Tesseract recognizer built on the `tesseract` crate.

use image::GrayImage;
use tesseract::{PageSegMode, Tesseract};
use tracing::trace;

use super::{RecognitionFailure, SegmentationMode, TextRecognizer, page_segmentation};
use crate::capability::Capability;
use crate::error::{InvxError, OcrError};
use crate::models::config::OcrConfig;

/// Recognizes pages through libtesseract.
///
/// A fresh engine is initialised per call; `Tesseract` is not `Sync`.
pub struct TesseractEngine {
    config: OcrConfig,
}

impl TesseractEngine {
    pub fn new(config: OcrConfig) -> Self {
        Self { config }
    }

    fn unavailable(&self, reason: String) -> RecognitionFailure {
        RecognitionFailure::Unavailable(InvxError::ConversionDependency {
            capability: Capability::Tesseract.to_string(),
            reason,
            remediation: Capability::Tesseract.remediation().to_string(),
        })
    }
}

impl TextRecognizer for TesseractEngine {
    fn recognize(&self, image: &GrayImage, mode: SegmentationMode) -> Result<String, RecognitionFailure> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OcrError::InvalidImage("empty page".to_string()).into());
        }
        let (Ok(w), Ok(h)) = (i32::try_from(width), i32::try_from(height)) else {
            return Err(OcrError::InvalidImage(format!("page too large: {}x{}", width, height)).into());
        };

        let datapath = self.config.tessdata.as_ref().and_then(|p| p.to_str());
        let engine = Tesseract::new(datapath, Some(self.config.language.as_str()))
            .map_err(|e| self.unavailable(format!("failed to initialise tesseract ({}): {}", self.config.language, e)))?;

        let mut engine = engine
            .set_frame(image.as_raw(), w, h, 1, w)
            .map_err(|e| OcrError::InvalidImage(e.to_string()))?;
        engine.set_page_seg_mode(page_seg_mode(page_segmentation(&self.config, mode)));

        let mut engine = engine
            .recognize()
            .map_err(|e| OcrError::Recognition(e.to_string()))?;
        let text = engine
            .get_text()
            .map_err(|e| OcrError::Recognition(e.to_string()))?;

        trace!("libtesseract ({:?}) returned {} chars", mode, text.len());
        Ok(text)
    }
}

/// Tesseract's numeric `--psm` values as the crate's enum.
fn page_seg_mode(psm: u8) -> PageSegMode {
    match psm {
        0 => PageSegMode::PsmOsdOnly,
        1 => PageSegMode::PsmAutoOsd,
        2 => PageSegMode::PsmAutoOnly,
        4 => PageSegMode::PsmSingleColumn,
        5 => PageSegMode::PsmSingleBlockVertText,
        6 => PageSegMode::PsmSingleBlock,
        7 => PageSegMode::PsmSingleLine,
        8 => PageSegMode::PsmSingleWord,
        9 => PageSegMode::PsmCircleWord,
        10 => PageSegMode::PsmSingleChar,
        11 => PageSegMode::PsmSparseText,
        12 => PageSegMode::PsmSparseTextOsd,
        13 => PageSegMode::PsmRawLine,
        _ => PageSegMode::PsmAuto,
    }
}
