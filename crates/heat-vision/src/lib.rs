//! Vision side of the heat acquisition pipeline: template caching,
//! multi-scale correlation search with temporal tracking, and digit
//! extraction through an external OCR engine.

mod extractor;
mod locator;
mod ocr;
mod preprocess;
mod template;

pub use extractor::{ocr_rect, DigitExtractor, OcrConfig, RelativeRect};
pub use locator::{Locator, MatchConfig, MatchResult};
pub use ocr::{parse_digits, resolve_tesseract, OcrEngine, TesseractOcr};
pub use preprocess::binarize_for_ocr;
pub use template::{Template, TemplateStore};
