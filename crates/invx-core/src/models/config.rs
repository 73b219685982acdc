//! Configuration structures for the extraction pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::InvxError;

/// Main configuration for the invx pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InvxConfig {
    /// Image quality thresholds.
    pub quality: QualityThresholds,

    /// Image preprocessing configuration.
    pub preprocess: PreprocessConfig,

    /// PDF processing configuration.
    pub pdf: PdfConfig,

    /// OCR configuration.
    pub ocr: OcrConfig,

    /// Structuring model configuration.
    pub structuring: StructuringConfig,

    /// Batch processing configuration.
    pub batch: BatchConfig,

    /// Explicit locations for external binaries.
    pub capabilities: CapabilityPaths,
}

/// Bounds that decide between simple and advanced preprocessing.
///
/// The defaults are starting points and should be recalibrated against a
/// labelled sample of real scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// Mean intensity below this is "too dark".
    pub brightness_min: f64,

    /// Mean intensity above this is "too bright".
    pub brightness_max: f64,

    /// Intensity standard deviation below this is "low contrast".
    pub contrast_min: f64,

    /// Laplacian variance below this is "blurry".
    pub sharpness_min: f64,

    /// Pages with contrast below this carry no ink and are skipped.
    pub blank_contrast: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            brightness_min: 100.0,
            brightness_max: 200.0,
            contrast_min: 40.0,
            sharpness_min: 100.0,
            blank_contrast: 2.0,
        }
    }
}

/// Image preprocessing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Run preprocessing at all; when false OCR sees the grayscale page.
    pub enabled: bool,

    /// Skew correction.
    pub deskew: DeskewConfig,

    /// Contrast factor of the simple strategy.
    pub contrast_factor: f32,

    /// Sharpness factor of the simple strategy.
    pub sharpness_factor: f32,

    /// Bilateral filter diameter in pixels.
    pub bilateral_diameter: u32,

    /// Bilateral filter range sigma.
    pub bilateral_sigma_color: f32,

    /// Bilateral filter spatial sigma.
    pub bilateral_sigma_space: f32,

    /// Adaptive threshold block size (odd).
    pub threshold_block_size: u32,

    /// Offset subtracted from the local mean.
    pub threshold_offset: i32,

    /// Radius of the closing structuring element.
    pub closing_radius: u8,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deskew: DeskewConfig::default(),
            contrast_factor: 1.5,
            sharpness_factor: 1.2,
            bilateral_diameter: 9,
            bilateral_sigma_color: 75.0,
            bilateral_sigma_space: 75.0,
            threshold_block_size: 35,
            threshold_offset: 11,
            closing_radius: 1,
        }
    }
}

/// Skew correction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskewConfig {
    /// Enable the deskew sub-step.
    pub enabled: bool,

    /// Skew below this magnitude (degrees) is left alone.
    pub min_angle: f32,

    /// Lines steeper than this (degrees) are not considered text lines.
    pub max_angle: f32,

    /// Hough cells need this fraction of the strongest cell's votes to count as lines.
    pub vote_fraction: f32,

    /// Longest side of the working copy used for line detection.
    pub analysis_size: u32,
}

impl Default for DeskewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_angle: 0.5,
            max_angle: 15.0,
            vote_fraction: 0.8,
            analysis_size: 1000,
        }
    }
}

/// Page rasterization backend for scanned PDFs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterizerKind {
    /// Render pages with poppler's `pdftoppm`.
    Poppler,
    /// Use the largest image embedded in each page.
    Embedded,
}

/// PDF processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// DPI for rendering PDF pages to images.
    pub render_dpi: u32,

    /// Minimum non-whitespace characters on a page for the text layer to count.
    pub min_text_chars: usize,

    /// Rasterizer used on the OCR path.
    pub rasterizer: RasterizerKind,

    /// Maximum pages to process (0 = unlimited).
    pub max_pages: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            render_dpi: 300,
            min_text_chars: 1,
            rasterizer: RasterizerKind::Poppler,
            max_pages: 0,
        }
    }
}

/// OCR configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tesseract language code(s), e.g. "eng" or "eng+deu".
    pub language: String,

    /// Tesseract OCR engine mode (command-line recognizer only).
    pub engine_mode: u8,

    /// Directory holding `*.traineddata`; the library default when unset.
    pub tessdata: Option<PathBuf>,

    /// Page segmentation mode for headers and metadata.
    pub prose_psm: u8,

    /// Page segmentation mode for line-item tables.
    pub table_psm: u8,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            engine_mode: 3,
            tessdata: None,
            prose_psm: 3,
            table_psm: 6,
        }
    }
}

/// Structuring model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuringConfig {
    /// Model identifier.
    pub model: String,

    /// Base URL of the generative language API.
    pub endpoint: String,

    /// Environment variable that holds the API key.
    pub api_key_env: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// Upper bound on generated tokens.
    pub max_output_tokens: u32,

    /// Deadline for a single model call, in seconds.
    pub request_timeout_secs: u64,

    /// Drop numeric values that do not occur in the extracted text.
    pub enforce_provenance: bool,
}

impl Default for StructuringConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.0,
            max_output_tokens: 8192,
            request_timeout_secs: 60,
            enforce_provenance: true,
        }
    }
}

impl StructuringConfig {
    /// Deadline for a single model call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Batch processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Documents processed concurrently.
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// Explicit locations for external binaries. A path may name the binary
/// itself or the directory that contains it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityPaths {
    /// Location of the `tesseract` binary.
    pub tesseract: Option<PathBuf>,

    /// Location of poppler's `pdftoppm` binary.
    pub pdftoppm: Option<PathBuf>,
}

impl InvxConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }

    /// Every setting the pipeline cannot run with, one message each.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut check = |ok: bool, message: String| {
            if !ok {
                problems.push(message);
            }
        };

        let q = &self.quality;
        check(
            q.brightness_min < q.brightness_max,
            format!(
                "quality.brightness_min ({}) must be below quality.brightness_max ({})",
                q.brightness_min, q.brightness_max
            ),
        );
        check(
            (0.0..=255.0).contains(&q.brightness_min) && (0.0..=255.0).contains(&q.brightness_max),
            "quality.brightness_min and quality.brightness_max must lie within 0..=255".to_string(),
        );
        check(
            q.blank_contrast < q.contrast_min,
            format!(
                "quality.blank_contrast ({}) must be below quality.contrast_min ({})",
                q.blank_contrast, q.contrast_min
            ),
        );

        let p = &self.preprocess;
        check(
            p.threshold_block_size >= 3 && p.threshold_block_size % 2 == 1,
            format!("preprocess.threshold_block_size must be odd and at least 3, got {}", p.threshold_block_size),
        );
        check(
            p.deskew.min_angle >= 0.0 && p.deskew.min_angle < p.deskew.max_angle,
            format!(
                "preprocess.deskew.min_angle ({}) must lie within 0 and preprocess.deskew.max_angle ({})",
                p.deskew.min_angle, p.deskew.max_angle
            ),
        );
        check(
            p.deskew.max_angle <= 45.0,
            format!("preprocess.deskew.max_angle must be at most 45 degrees, got {}", p.deskew.max_angle),
        );

        check(
            (72..=1200).contains(&self.pdf.render_dpi),
            format!("pdf.render_dpi must lie within 72..=1200, got {}", self.pdf.render_dpi),
        );

        let o = &self.ocr;
        check(!o.language.trim().is_empty(), "ocr.language must name at least one language".to_string());
        check(o.engine_mode <= 3, format!("ocr.engine_mode must lie within 0..=3, got {}", o.engine_mode));
        check(o.prose_psm <= 13, format!("ocr.prose_psm must lie within 0..=13, got {}", o.prose_psm));
        check(o.table_psm <= 13, format!("ocr.table_psm must lie within 0..=13, got {}", o.table_psm));

        let s = &self.structuring;
        check(!s.model.trim().is_empty(), "structuring.model must not be empty".to_string());
        check(
            s.endpoint.starts_with("https://") || s.endpoint.starts_with("http://"),
            format!("structuring.endpoint must be an http(s) URL, got {:?}", s.endpoint),
        );
        check(!s.api_key_env.trim().is_empty(), "structuring.api_key_env must not be empty".to_string());
        check(
            (0.0..=2.0).contains(&s.temperature),
            format!("structuring.temperature must lie within 0..=2, got {}", s.temperature),
        );
        check(s.max_output_tokens > 0, "structuring.max_output_tokens must be positive".to_string());
        check(s.request_timeout_secs > 0, "structuring.request_timeout_secs must be positive".to_string());

        check(self.batch.concurrency >= 1, "batch.concurrency must be at least 1".to_string());

        problems
    }

    /// Fail with every problem found by [`InvxConfig::problems`].
    pub fn validate(&self) -> Result<(), InvxError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(InvxError::Config(problems.join("; ")))
        }
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;
        std::fs::write(path, content)
    }
}
