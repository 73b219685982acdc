//! Pixel filters used by the two preprocessing strategies.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::close;

/// Contrast enhancement: blend every pixel away from the mean gray level.
///
/// A factor of 1.0 returns the input; larger factors stretch contrast.
pub fn enhance_contrast(image: &GrayImage, factor: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let count = (width as u64 * height as u64).max(1);
    let sum: u64 = image.pixels().map(|p| p[0] as u64).sum();
    let mean = (sum as f32 / count as f32).round();

    let mut result = image.clone();
    for pixel in result.pixels_mut() {
        pixel[0] = blend(mean, pixel[0] as f32, factor);
    }
    result
}

/// Sharpness enhancement: blend every pixel away from a smoothed copy.
///
/// The smoothing kernel is `[1 1 1; 1 5 1; 1 1 1] / 13`; border pixels are
/// left as they are.
pub fn enhance_sharpness(image: &GrayImage, factor: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut result = image.clone();
    if width < 3 || height < 3 {
        return result;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut acc = 0u32;
            for dy in 0..3 {
                for dx in 0..3 {
                    let weight = if dx == 1 && dy == 1 { 5 } else { 1 };
                    acc += weight * image.get_pixel(x + dx - 1, y + dy - 1)[0] as u32;
                }
            }
            let smoothed = acc as f32 / 13.0;
            let original = image.get_pixel(x, y)[0] as f32;
            result.put_pixel(x, y, Luma([blend(smoothed, original, factor)]));
        }
    }
    result
}

fn blend(degenerate: f32, original: f32, factor: f32) -> u8 {
    (degenerate + factor * (original - degenerate)).round().clamp(0.0, 255.0) as u8
}

/// Edge-preserving bilateral denoise.
///
/// Each output pixel is the average of its circular neighbourhood of the
/// given diameter, weighted by spatial distance and intensity difference.
pub fn bilateral_filter(image: &GrayImage, diameter: u32, sigma_color: f32, sigma_space: f32) -> GrayImage {
    let (width, height) = image.dimensions();
    let radius = (diameter / 2).max(1) as i64;

    let space_coeff = -0.5 / (sigma_space * sigma_space);
    let color_coeff = -0.5 / (sigma_color * sigma_color);

    let mut offsets = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let dist_sq = (dx * dx + dy * dy) as f32;
            if dist_sq <= (radius * radius) as f32 {
                offsets.push((dx, dy, (dist_sq * space_coeff).exp()));
            }
        }
    }
    let color_weights: Vec<f32> = (0..256)
        .map(|d| ((d * d) as f32 * color_coeff).exp())
        .collect();

    let mut result = GrayImage::new(width, height);
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let center = image.get_pixel(x as u32, y as u32)[0] as i32;
            let mut weighted = 0.0f32;
            let mut total = 0.0f32;
            for &(dx, dy, space_weight) in &offsets {
                let nx = (x + dx).clamp(0, width as i64 - 1) as u32;
                let ny = (y + dy).clamp(0, height as i64 - 1) as u32;
                let value = image.get_pixel(nx, ny)[0] as i32;
                let weight = space_weight * color_weights[(value - center).unsigned_abs() as usize];
                weighted += weight * value as f32;
                total += weight;
            }
            let out = if total > 0.0 { weighted / total } else { center as f32 };
            result.put_pixel(x as u32, y as u32, Luma([out.round().clamp(0.0, 255.0) as u8]));
        }
    }
    result
}

/// Binarize against the local mean of a `block_size` window minus `c`.
///
/// Pixels brighter than the threshold become white, the rest black. The
/// window is clipped at the borders; local sums come from an integral image.
pub fn adaptive_threshold(image: &GrayImage, block_size: u32, c: i32) -> GrayImage {
    let (width, height) = image.dimensions();
    let w = width as usize;
    let h = height as usize;

    let mut integral = vec![0u64; (w + 1) * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += image.get_pixel(x as u32, y as u32)[0] as u64;
            integral[(y + 1) * (w + 1) + x + 1] = integral[y * (w + 1) + x + 1] + row_sum;
        }
    }

    let half = (block_size / 2) as usize;
    let mut result = GrayImage::new(width, height);
    for y in 0..h {
        let y0 = y.saturating_sub(half);
        let y1 = (y + half + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(half);
            let x1 = (x + half + 1).min(w);
            let sum = integral[y1 * (w + 1) + x1] + integral[y0 * (w + 1) + x0]
                - integral[y0 * (w + 1) + x1]
                - integral[y1 * (w + 1) + x0];
            let count = ((y1 - y0) * (x1 - x0)) as u64;
            let mean = (sum / count) as i32;
            let pixel = image.get_pixel(x as u32, y as u32)[0] as i32;
            let output = if pixel > mean - c { 255 } else { 0 };
            result.put_pixel(x as u32, y as u32, Luma([output]));
        }
    }
    result
}

/// Morphological closing of dark strokes on a light background.
///
/// Closes gaps in glyphs of up to `2 * radius` pixels. A radius of 0 is a no-op.
pub fn close_strokes(binary: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return binary.clone();
    }
    let mut inverted = binary.clone();
    image::imageops::invert(&mut inverted);
    let mut closed = close(&inverted, Norm::LInf, radius);
    image::imageops::invert(&mut closed);
    closed
}
