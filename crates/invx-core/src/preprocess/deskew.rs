//! Skew detection and correction using a Hough transform.
//!
//! Edges are found with Canny, then voted into a Hough accumulator restricted
//! to near-horizontal lines. The skew is the median angle of the strongest
//! cells; the page is rotated back only when that exceeds the configured
//! minimum, which makes the step idempotent.

use image::imageops::{FilterType, resize};
use image::{GrayImage, Luma};
use imageproc::edges::canny;
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use tracing::{debug, trace};

use crate::models::config::DeskewConfig;

const ANGLE_STEP: f32 = 0.1;

/// Detect page skew in degrees; positive means the text runs clockwise.
///
/// Returns 0.0 for pages too small or without line structure.
pub fn detect_skew(image: &GrayImage, config: &DeskewConfig) -> f32 {
    let (width, height) = image.dimensions();
    if width < 20 || height < 20 {
        return 0.0;
    }

    let longest = width.max(height);
    let working = if longest > config.analysis_size && config.analysis_size > 0 {
        let scale = config.analysis_size as f32 / longest as f32;
        let w = ((width as f32 * scale).round() as u32).max(1);
        let h = ((height as f32 * scale).round() as u32).max(1);
        resize(image, w, h, FilterType::Triangle)
    } else {
        image.clone()
    };

    let edges = canny(&working, 50.0, 100.0);
    let angles = strongest_line_angles(&edges, config);
    if angles.is_empty() {
        trace!("No dominant lines found");
        return 0.0;
    }

    let mut sorted = angles;
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted[sorted.len() / 2]
}

/// Skew angles of Hough cells that reach `vote_fraction` of the strongest cell.
fn strongest_line_angles(edges: &GrayImage, config: &DeskewConfig) -> Vec<f32> {
    let (width, height) = edges.dimensions();
    let max_angle = config.max_angle.abs().max(ANGLE_STEP);
    let steps = (2.0 * max_angle / ANGLE_STEP).round() as usize + 1;

    let skews: Vec<f32> = (0..steps)
        .map(|i| -max_angle + i as f32 * ANGLE_STEP)
        .collect();
    let trig: Vec<(f32, f32)> = skews
        .iter()
        .map(|skew| {
            let theta = (90.0 + skew).to_radians();
            (theta.cos(), theta.sin())
        })
        .collect();

    let diagonal = ((width as f32).powi(2) + (height as f32).powi(2)).sqrt().ceil() as usize;
    let bins = 2 * diagonal + 1;
    let mut accumulator = vec![0u32; steps * bins];

    for (x, y, pixel) in edges.enumerate_pixels() {
        if pixel[0] == 0 {
            continue;
        }
        let (fx, fy) = (x as f32, y as f32);
        for (i, (cos, sin)) in trig.iter().enumerate() {
            let rho = fx * cos + fy * sin;
            let bin = (rho + diagonal as f32).round() as usize;
            if bin < bins {
                accumulator[i * bins + bin] += 1;
            }
        }
    }

    let peak = accumulator.iter().copied().max().unwrap_or(0);
    let min_votes = (width.min(height) / 10).max(10);
    if peak < min_votes {
        return Vec::new();
    }

    let threshold = (peak as f32 * config.vote_fraction.clamp(0.0, 1.0)).ceil() as u32;
    accumulator
        .chunks(bins)
        .zip(&skews)
        .flat_map(|(row, skew)| {
            row.iter()
                .filter(move |votes| **votes >= threshold)
                .map(move |_| *skew)
        })
        .collect()
}

/// Rotate a page by `-angle` degrees around its centre, filling with white.
pub fn rotate(image: &GrayImage, angle: f32) -> GrayImage {
    rotate_about_center(image, (-angle).to_radians(), Interpolation::Bilinear, Luma([255]))
}

/// Straighten a page. Returns the corrected page and the angle removed
/// (0.0 when the page was already within tolerance).
pub fn deskew(image: &GrayImage, config: &DeskewConfig) -> (GrayImage, f32) {
    let angle = detect_skew(image, config);
    if angle.abs() <= config.min_angle {
        trace!("Skew {:.2} deg within tolerance", angle);
        return (image.clone(), 0.0);
    }
    debug!("Correcting skew of {:.2} deg", angle);
    (rotate(image, angle), angle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ruled_page() -> GrayImage {
        let mut img = GrayImage::from_pixel(400, 300, Luma([255]));
        for line in 0..5 {
            let y0 = 60 + line * 45;
            for y in y0..y0 + 3 {
                for x in 40..360 {
                    img.put_pixel(x, y, Luma([0]));
                }
            }
        }
        img
    }

    #[test]
    fn test_straight_page_is_left_alone() {
        let config = DeskewConfig::default();
        let page = ruled_page();
        assert!(detect_skew(&page, &config).abs() <= config.min_angle);

        let (out, angle) = deskew(&page, &config);
        assert_eq!(angle, 0.0);
        assert_eq!(out, page);
    }

    #[test]
    fn test_detects_and_corrects_rotation() {
        let config = DeskewConfig::default();
        for skew in [-5.0f32, 5.0] {
            let skewed = rotate(&ruled_page(), skew);

            let detected = detect_skew(&skewed, &config);
            assert!((3.0..=7.0).contains(&detected.abs()), "skew {}: detected {}", skew, detected);

            let (straightened, applied) = deskew(&skewed, &config);
            assert!(applied != 0.0, "skew {}: nothing applied", skew);
            let residual = detect_skew(&straightened, &config);
            assert!(residual.abs() <= config.min_angle, "skew {}: residual {}", skew, residual);

            // A second pass finds nothing left to correct.
            let (again, angle) = deskew(&straightened, &config);
            assert_eq!(angle, 0.0, "skew {}", skew);
            assert_eq!(again, straightened);
        }
    }

    #[test]
    fn test_deskew_is_idempotent_on_straight_page() {
        let config = DeskewConfig::default();
        let (once, _) = deskew(&ruled_page(), &config);
        let (twice, angle) = deskew(&once, &config);
        assert_eq!(angle, 0.0);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_blank_page_has_no_skew() {
        let blank = GrayImage::from_pixel(200, 200, Luma([255]));
        assert_eq!(detect_skew(&blank, &DeskewConfig::default()), 0.0);
    }
}
