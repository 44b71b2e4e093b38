//! Windowed structural similarity on downscaled grayscale planes.
//!
//! Slower than the fingerprint but far better at telling a real content
//! change from rendering noise, so it only runs on ambiguous distances.

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

const MAX_WIDTH: u32 = 256;
const WINDOW: u32 = 8;
const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

pub fn prepare(image: &DynamicImage) -> GrayImage {
    let gray = image.to_luma8();
    if gray.width() <= MAX_WIDTH {
        return gray;
    }
    let height = ((u64::from(gray.height()) * u64::from(MAX_WIDTH)) / u64::from(gray.width()))
        .max(1) as u32;
    image::imageops::resize(&gray, MAX_WIDTH, height, FilterType::Triangle)
}

/// Mean SSIM over non-overlapping windows, in [0, 1] for practical inputs.
pub fn similarity(a: &GrayImage, b: &GrayImage) -> f64 {
    let resized;
    let b = if a.dimensions() != b.dimensions() {
        resized = image::imageops::resize(b, a.width(), a.height(), FilterType::Triangle);
        &resized
    } else {
        b
    };

    let (width, height) = a.dimensions();
    if width == 0 || height == 0 {
        return 1.0;
    }
    let win_w = WINDOW.min(width);
    let win_h = WINDOW.min(height);

    let mut total = 0.0;
    let mut windows = 0u32;
    let mut y = 0;
    while y + win_h <= height {
        let mut x = 0;
        while x + win_w <= width {
            total += window_ssim(a, b, x, y, win_w, win_h);
            windows += 1;
            x += win_w;
        }
        y += win_h;
    }

    if windows == 0 {
        return 1.0;
    }
    (total / f64::from(windows)).clamp(0.0, 1.0)
}

/// Structural difference score: 0 identical, 1 unrelated.
pub fn difference(a: &GrayImage, b: &GrayImage) -> f64 {
    1.0 - similarity(a, b)
}

fn window_ssim(a: &GrayImage, b: &GrayImage, x0: u32, y0: u32, w: u32, h: u32) -> f64 {
    let n = f64::from(w * h);
    let (mut sum_a, mut sum_b) = (0.0, 0.0);
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            sum_a += f64::from(a.get_pixel(x, y)[0]);
            sum_b += f64::from(b.get_pixel(x, y)[0]);
        }
    }
    let mean_a = sum_a / n;
    let mean_b = sum_b / n;

    let (mut var_a, mut var_b, mut cov) = (0.0, 0.0, 0.0);
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let da = f64::from(a.get_pixel(x, y)[0]) - mean_a;
            let db = f64::from(b.get_pixel(x, y)[0]) - mean_b;
            var_a += da * da;
            var_b += db * db;
            cov += da * db;
        }
    }
    var_a /= n;
    var_b /= n;
    cov /= n;

    ((2.0 * mean_a * mean_b + C1) * (2.0 * cov + C2))
        / ((mean_a * mean_a + mean_b * mean_b + C1) * (var_a + var_b + C2))
}
