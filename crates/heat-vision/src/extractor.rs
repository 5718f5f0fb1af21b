use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::locator::MatchResult;
use crate::ocr::{parse_digits, OcrEngine, TesseractOcr};
use crate::preprocess::binarize_for_ocr;

/// Digit region relative to the matched template, as fractions of the
/// scaled template size. Independent of match scale by construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativeRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// OCR invocation knobs from the external configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Tesseract page segmentation mode; 7 treats the region as a
    /// single text line.
    pub psm: u32,
    /// Fixed binarization cutoff applied after the adaptive threshold.
    pub threshold: u8,
    /// Explicit engine binary, else auto-detected.
    pub tesseract_cmd: Option<PathBuf>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            psm: 7,
            threshold: 150,
            tesseract_cmd: None,
        }
    }
}

/// Reads the number rendered next to a located template match.
pub struct DigitExtractor {
    engine: Box<dyn OcrEngine>,
    threshold: u8,
}

impl DigitExtractor {
    pub fn new(config: &OcrConfig) -> anyhow::Result<Self> {
        let engine = TesseractOcr::new(config.tesseract_cmd.as_deref(), config.psm)?;
        Ok(Self {
            engine: Box::new(engine),
            threshold: config.threshold,
        })
    }

    /// Substitute a different recognizer; used by tests and offline tools.
    pub fn with_engine(engine: Box<dyn OcrEngine>, threshold: u8) -> Self {
        Self { engine, threshold }
    }

    /// Extract the digits from the region positioned by `relative_rect`
    /// next to the match. `None` when the region leaves the frame, the
    /// engine fails, or no digits come back.
    pub fn extract(
        &self,
        frame: &RgbImage,
        m: &MatchResult,
        template_size: (u32, u32),
        relative_rect: &RelativeRect,
    ) -> Option<u32> {
        let (x, y, w, h) = ocr_rect(m, template_size, relative_rect, frame.dimensions())?;
        let roi = image::imageops::crop_imm(frame, x, y, w, h).to_image();

        let binary = binarize_for_ocr(&roi, self.threshold);
        let text = match self.engine.recognize_digits(&binary) {
            Ok(text) => text,
            Err(e) => {
                warn!("OCR failed on {w}x{h} region: {e:#}");
                return None;
            }
        };
        parse_digits(&text)
    }
}

/// Absolute pixel rectangle of the digit region. The origin is clamped
/// into the frame first and the size shrunk afterwards, so a region
/// hanging over a frame edge loses its overhang (and aspect) rather
/// than shifting inwards.
pub fn ocr_rect(
    m: &MatchResult,
    template_size: (u32, u32),
    rel: &RelativeRect,
    frame_size: (u32, u32),
) -> Option<(u32, u32, u32, u32)> {
    let (fw, fh) = (frame_size.0 as i64, frame_size.1 as i64);
    if fw == 0 || fh == 0 {
        debug!("OCR region requested on an empty frame");
        return None;
    }

    let scaled_w = (template_size.0 as f64 * m.scale) as i64;
    let scaled_h = (template_size.1 as f64 * m.scale) as i64;

    let mut x = m.x + (scaled_w as f64 * rel.x) as i64;
    let mut y = m.y + (scaled_h as f64 * rel.y) as i64;
    let mut w = ((scaled_w as f64 * rel.width) as i64).max(1);
    let mut h = ((scaled_h as f64 * rel.height) as i64).max(1);

    x = x.clamp(0, fw - 1);
    y = y.clamp(0, fh - 1);
    if x + w > fw {
        w = fw - x;
    }
    if y + h > fh {
        h = fh - y;
    }
    if w <= 0 || h <= 0 {
        debug!("OCR region has no area after clipping");
        return None;
    }
    Some((x as u32, y as u32, w as u32, h as u32))
}
