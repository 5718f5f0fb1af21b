use anyhow::{anyhow, bail, Context, Result};
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

const DIGIT_WHITELIST: &str = "0123456789";

#[cfg(windows)]
const KNOWN_INSTALL_PATHS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
];
#[cfg(not(windows))]
const KNOWN_INSTALL_PATHS: &[&str] = &[
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
];

/// Character recognizer invoked on a preprocessed binary image.
/// The production implementation shells out to Tesseract; tests
/// substitute a canned engine.
pub trait OcrEngine: Send {
    fn recognize_digits(&self, image: &GrayImage) -> Result<String>;
}

/// External Tesseract binary restricted to single-line digit output.
pub struct TesseractOcr {
    executable: PathBuf,
    psm: u32,
}

impl TesseractOcr {
    /// Resolve the executable (explicit override, PATH, then well-known
    /// install locations) and fix the page segmentation mode.
    pub fn new(executable: Option<&Path>, psm: u32) -> Result<Self> {
        let executable = resolve_tesseract(executable)?;
        debug!("Using Tesseract at {}", executable.display());
        Ok(Self { executable, psm })
    }

    /// Version string reported by the resolved binary, first line only.
    pub fn version(&self) -> Result<String> {
        let output = Command::new(&self.executable)
            .arg("--version")
            .output()
            .context("Failed to run tesseract --version")?;
        if !output.status.success() {
            bail!("tesseract --version failed");
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().next().unwrap_or_default().trim().to_string())
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize_digits(&self, image: &GrayImage) -> Result<String> {
        let input = tempfile::Builder::new()
            .prefix("heat_ocr_")
            .suffix(".png")
            .tempfile()
            .context("Failed to create OCR temp file")?;
        image
            .save(input.path())
            .context("Failed to write OCR input image")?;

        let output = Command::new(&self.executable)
            .arg(input.path())
            .arg("stdout")
            .arg("--psm")
            .arg(self.psm.to_string())
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={DIGIT_WHITELIST}"))
            .output()
            .context("Failed to run tesseract")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Tesseract failed: {}", stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Find the Tesseract executable. An explicit override must exist as a
/// file; otherwise the PATH is probed, then the usual install locations.
pub fn resolve_tesseract(executable: Option<&Path>) -> Result<PathBuf> {
    if let Some(explicit) = executable {
        if explicit.is_file() {
            return Ok(explicit.to_path_buf());
        }
        bail!(
            "Configured Tesseract binary {} does not exist",
            explicit.display()
        );
    }

    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    for candidate in KNOWN_INSTALL_PATHS {
        let path = PathBuf::from(candidate);
        if path.is_file() {
            return Ok(path);
        }
    }

    Err(anyhow!(
        "Tesseract not found: set an explicit engine path or install tesseract-ocr"
    ))
}

/// Reduce raw OCR text to a non-negative integer. All non-digit
/// characters are stripped first, so concatenated digit runs read as
/// one number; an empty or overflowing result is absent, not an error.
pub fn parse_digits(text: &str) -> Option<u32> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        debug!("OCR produced no digits from {text:?}");
        return None;
    }
    match digits.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            debug!("Failed to parse OCR digits: {digits}");
            None
        }
    }
}
