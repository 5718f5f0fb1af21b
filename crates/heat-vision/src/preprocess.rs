use image::{GrayImage, RgbImage};

/// Blur radius matching a 3x3 Gaussian kernel.
const BLUR_SIGMA: f32 = 0.8;
/// Adaptive threshold neighborhood (square window side).
const ADAPTIVE_WINDOW: u32 = 11;
/// Constant subtracted from the neighborhood mean.
const ADAPTIVE_BIAS: f64 = 2.0;

/// Turn the digit region into a binary image the OCR engine reads well:
/// grayscale, light Gaussian blur, adaptive mean threshold (inverse
/// binary) to lift the digits out of uneven backgrounds, then a fixed
/// re-threshold at the configured cutoff.
pub fn binarize_for_ocr(roi: &RgbImage, cutoff: u8) -> GrayImage {
    let gray = image::imageops::grayscale(roi);
    let blurred = image::imageops::blur(&gray, BLUR_SIGMA);
    let adaptive = adaptive_mean_threshold_inv(&blurred, ADAPTIVE_WINDOW, ADAPTIVE_BIAS);
    fixed_threshold(&adaptive, cutoff)
}

/// Inverse binary adaptive threshold: a pixel brighter than its
/// neighborhood mean (minus the bias) becomes black, everything else
/// white. The window is clamped at the borders.
fn adaptive_mean_threshold_inv(img: &GrayImage, window: u32, bias: f64) -> GrayImage {
    let (w, h) = img.dimensions();
    let half = (window / 2) as i64;

    GrayImage::from_fn(w, h, |x, y| {
        let x0 = (x as i64 - half).max(0) as u32;
        let y0 = (y as i64 - half).max(0) as u32;
        let x1 = (x as i64 + half + 1).min(w as i64) as u32;
        let y1 = (y as i64 + half + 1).min(h as i64) as u32;

        let mut sum = 0.0;
        for wy in y0..y1 {
            for wx in x0..x1 {
                sum += img.get_pixel(wx, wy)[0] as f64;
            }
        }
        let count = ((x1 - x0) * (y1 - y0)) as f64;
        let mean = sum / count;

        if (img.get_pixel(x, y)[0] as f64) > mean - bias {
            image::Luma([0u8])
        } else {
            image::Luma([255u8])
        }
    })
}

/// Plain binary threshold: above the cutoff becomes white, the rest black.
fn fixed_threshold(img: &GrayImage, cutoff: u8) -> GrayImage {
    let (w, h) = img.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        if img.get_pixel(x, y)[0] > cutoff {
            image::Luma([255u8])
        } else {
            image::Luma([0u8])
        }
    })
}
