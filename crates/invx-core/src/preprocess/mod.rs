//! Adaptive image preprocessing for OCR.
//!
//! The strategy is chosen purely from the page's [`QualityMetrics`]:
//! good pages get a light contrast/sharpness boost, poor pages get
//! denoising, local binarization and stroke repair.

pub mod deskew;
pub mod filters;

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::config::{PreprocessConfig, QualityThresholds};
use crate::quality::{QualityAssessment, QualityMetrics, needs_advanced};

/// Preprocessing strategy applied to a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Grayscale only; preprocessing disabled.
    Passthrough,
    /// Contrast and sharpness enhancement.
    Simple,
    /// Bilateral denoise, adaptive threshold, closing.
    Advanced,
}

/// A page prepared for recognition.
#[derive(Debug, Clone)]
pub struct PreprocessedPage {
    /// Cleaned grayscale raster.
    pub image: GrayImage,
    /// Strategy that produced it.
    pub strategy: Strategy,
    /// Skew removed, in degrees.
    pub deskew_angle: f32,
    /// Why the strategy was chosen.
    pub assessment: QualityAssessment,
}

/// Image preprocessor for the OCR path.
#[derive(Debug, Clone, Default)]
pub struct Preprocessor {
    config: PreprocessConfig,
    thresholds: QualityThresholds,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig, thresholds: QualityThresholds) -> Self {
        Self { config, thresholds }
    }

    /// Prepare a page for recognition using its measured quality.
    pub fn preprocess(&self, image: &DynamicImage, metrics: &QualityMetrics) -> PreprocessedPage {
        let assessment = needs_advanced(metrics, &self.thresholds);
        let gray = image.to_luma8();

        if !self.config.enabled {
            return PreprocessedPage {
                image: gray,
                strategy: Strategy::Passthrough,
                deskew_angle: 0.0,
                assessment,
            };
        }

        let (gray, deskew_angle) = if self.config.deskew.enabled {
            deskew::deskew(&gray, &self.config.deskew)
        } else {
            (gray, 0.0)
        };

        let (image, strategy) = if assessment.advanced {
            (self.advanced(&gray), Strategy::Advanced)
        } else {
            (self.simple(&gray), Strategy::Simple)
        };

        debug!(
            "Preprocessed {}x{} page with {:?} strategy ({})",
            image.width(),
            image.height(),
            strategy,
            assessment.reasons.join(", ")
        );

        PreprocessedPage {
            image,
            strategy,
            deskew_angle,
            assessment,
        }
    }

    fn simple(&self, gray: &GrayImage) -> GrayImage {
        let contrasted = filters::enhance_contrast(gray, self.config.contrast_factor);
        filters::enhance_sharpness(&contrasted, self.config.sharpness_factor)
    }

    fn advanced(&self, gray: &GrayImage) -> GrayImage {
        let denoised = filters::bilateral_filter(
            gray,
            self.config.bilateral_diameter,
            self.config.bilateral_sigma_color,
            self.config.bilateral_sigma_space,
        );
        let binary = filters::adaptive_threshold(
            &denoised,
            self.config.threshold_block_size,
            self.config.threshold_offset,
        );
        filters::close_strokes(&binary, self.config.closing_radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::analyze;
    use image::Luma;

    fn text_like_page(background: u8, ink: u8) -> DynamicImage {
        let img = GrayImage::from_fn(120, 80, |x, y| {
            if y % 20 < 3 && (10..110).contains(&x) { Luma([ink]) } else { Luma([background]) }
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_dark_page_takes_advanced_path() {
        let page = text_like_page(60, 10);
        let metrics = analyze(&page);
        let out = Preprocessor::default().preprocess(&page, &metrics);

        assert_eq!(out.strategy, Strategy::Advanced);
        assert!(out.assessment.reasons.contains(&"too dark".to_string()));
        assert!(out.image.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_good_metrics_take_simple_path() {
        let page = text_like_page(230, 20);
        let metrics = QualityMetrics {
            brightness: 150.0,
            contrast: 60.0,
            sharpness: 500.0,
            resolution: (120, 80),
        };
        let out = Preprocessor::default().preprocess(&page, &metrics);

        assert_eq!(out.strategy, Strategy::Simple);
        assert_eq!(out.assessment.reasons, vec!["good quality"]);
        assert_eq!(out.image.dimensions(), (120, 80));
    }

    #[test]
    fn test_disabled_is_passthrough() {
        let config = PreprocessConfig {
            enabled: false,
            ..Default::default()
        };
        let page = text_like_page(200, 0);
        let metrics = analyze(&page);
        let out = Preprocessor::new(config, QualityThresholds::default()).preprocess(&page, &metrics);

        assert_eq!(out.strategy, Strategy::Passthrough);
        assert_eq!(out.image, page.to_luma8());
    }
}
