//! Objective image quality metrics and the preprocessing decision.

use image::{DynamicImage, GrayImage};
use imageproc::filter::laplacian_filter;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::config::QualityThresholds;

/// Quality measurements of one page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Mean grayscale intensity (0-255).
    pub brightness: f64,
    /// Standard deviation of intensity.
    pub contrast: f64,
    /// Variance of the Laplacian response.
    pub sharpness: f64,
    /// Width and height in pixels.
    pub resolution: (u32, u32),
}

/// Outcome of [`needs_advanced`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// Whether the advanced strategy is required.
    pub advanced: bool,
    /// Human-readable reasons; "good quality" when nothing is wrong.
    pub reasons: Vec<String>,
}

/// Measure a page.
pub fn analyze(image: &DynamicImage) -> QualityMetrics {
    let gray = image.to_luma8();
    let metrics = analyze_gray(&gray);
    debug!(
        "Quality {}x{}: brightness={:.1} contrast={:.1} sharpness={:.1}",
        metrics.resolution.0, metrics.resolution.1, metrics.brightness, metrics.contrast, metrics.sharpness
    );
    metrics
}

/// Measure a grayscale page.
pub fn analyze_gray(gray: &GrayImage) -> QualityMetrics {
    let resolution = gray.dimensions();
    let pixel_count = (resolution.0 as u64 * resolution.1 as u64).max(1) as f64;

    let (sum, sum_sq) = gray.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
        let v = p[0] as f64;
        (s + v, sq + v * v)
    });
    let brightness = sum / pixel_count;
    let contrast = (sum_sq / pixel_count - brightness * brightness).max(0.0).sqrt();

    let sharpness = if resolution.0 >= 3 && resolution.1 >= 3 {
        let response = laplacian_filter(gray);
        let (s, sq) = response.pixels().fold((0.0f64, 0.0f64), |(s, sq), p| {
            let v = p[0] as f64;
            (s + v, sq + v * v)
        });
        let mean = s / pixel_count;
        (sq / pixel_count - mean * mean).max(0.0)
    } else {
        0.0
    };

    QualityMetrics {
        brightness,
        contrast,
        sharpness,
        resolution,
    }
}

/// Decide whether a page needs the advanced preprocessing strategy.
pub fn needs_advanced(metrics: &QualityMetrics, thresholds: &QualityThresholds) -> QualityAssessment {
    let mut reasons = Vec::new();

    if metrics.brightness < thresholds.brightness_min {
        reasons.push("too dark".to_string());
    }
    if metrics.brightness > thresholds.brightness_max {
        reasons.push("too bright".to_string());
    }
    if metrics.contrast < thresholds.contrast_min {
        reasons.push("low contrast".to_string());
    }
    if metrics.sharpness < thresholds.sharpness_min {
        reasons.push("blurry".to_string());
    }

    if reasons.is_empty() {
        QualityAssessment {
            advanced: false,
            reasons: vec!["good quality".to_string()],
        }
    } else {
        QualityAssessment {
            advanced: true,
            reasons,
        }
    }
}

/// A page with no measurable ink.
pub fn is_blank(metrics: &QualityMetrics, thresholds: &QualityThresholds) -> bool {
    metrics.contrast < thresholds.blank_contrast
}
