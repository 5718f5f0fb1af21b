use heat_capture::{BackendKind, Region};
use heat_vision::{MatchConfig, OcrConfig, RelativeRect};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Parameters recognized by the acquisition pipeline. Owned and
/// persisted by the external configuration collaborator; this core only
/// consumes the deserialized values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Capture backend selector: auto, fast, portable (or the legacy
    /// vulkan alias).
    pub capture_backend: String,
    /// Reference icon image on disk.
    pub template_path: Option<PathBuf>,
    /// Screen area to capture; unset captures the full primary display.
    pub capture_region: Option<Region>,
    /// Digit region relative to the matched icon.
    pub ocr_relative_rect: Option<RelativeRect>,
    pub search_margin: u32,
    pub search_scale_steps: u32,
    pub search_scale_factor: f64,
    pub match_threshold: f64,
    pub ocr_psm: u32,
    pub ocr_threshold: u8,
    /// Explicit Tesseract binary, else auto-detected.
    pub tesseract_cmd: Option<PathBuf>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            capture_backend: "auto".to_string(),
            template_path: None,
            capture_region: None,
            ocr_relative_rect: None,
            search_margin: 16,
            search_scale_steps: 3,
            search_scale_factor: 0.12,
            match_threshold: 0.75,
            ocr_psm: 7,
            ocr_threshold: 150,
            tesseract_cmd: None,
        }
    }
}

impl VisionConfig {
    pub fn backend_kind(&self) -> anyhow::Result<BackendKind> {
        BackendKind::parse(&self.capture_backend)
    }

    /// Configured capture region, with non-positive sizes treated as unset.
    pub fn region(&self) -> Option<Region> {
        self.capture_region.filter(|r| !r.is_empty())
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            search_margin: self.search_margin,
            scale_steps: self.search_scale_steps,
            scale_factor: self.search_scale_factor,
            match_threshold: self.match_threshold,
        }
    }

    pub fn ocr_config(&self) -> OcrConfig {
        OcrConfig {
            psm: self.ocr_psm,
            threshold: self.ocr_threshold,
            tesseract_cmd: self.tesseract_cmd.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = VisionConfig::default();
        assert_eq!(config.capture_backend, "auto");
        assert_eq!(config.search_margin, 16);
        assert_eq!(config.search_scale_steps, 3);
        assert!((config.search_scale_factor - 0.12).abs() < 1e-12);
        assert!((config.match_threshold - 0.75).abs() < 1e-12);
        assert_eq!(config.ocr_psm, 7);
        assert_eq!(config.ocr_threshold, 150);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: VisionConfig = serde_json::from_str(
            r#"{"capture_backend": "vulkan", "match_threshold": 0.9}"#,
        )
        .unwrap();
        assert_eq!(
            config.backend_kind().unwrap(),
            heat_capture::BackendKind::Portable
        );
        assert!((config.match_threshold - 0.9).abs() < 1e-12);
        assert_eq!(config.search_margin, 16);
    }

    #[test]
    fn test_empty_region_treated_as_unset() {
        let config = VisionConfig {
            capture_region: Some(Region::new(10, 10, 0, 50)),
            ..VisionConfig::default()
        };
        assert!(config.region().is_none());
    }
}
