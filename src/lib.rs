//! Acquisition core for the heat gauge overlay.
//!
//! Captures screen frames, locates the heat icon by multi-scale
//! template correlation with temporal tracking, and reads the digits
//! rendered next to it through an external OCR engine. The overlay
//! consumes the result through [`HeatProvider::get_heat`], a
//! non-blocking read of the latest published value.

mod config;
mod provider;

pub use config::VisionConfig;
pub use provider::{HeatProvider, SimulatedHeatProvider, VisionHeatProvider};

pub use heat_capture::{
    build_backend, BackendKind, CaptureBackend, Frame, Region, ReplayCapture,
};
pub use heat_vision::{
    DigitExtractor, Locator, MatchConfig, MatchResult, OcrConfig, OcrEngine, RelativeRect,
    TemplateStore, TesseractOcr,
};
