use anyhow::{anyhow, bail, Context, Result};
use image::{RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use xcap::Monitor;

pub mod replay;
#[cfg(windows)]
pub mod wgc;

pub use replay::ReplayCapture;
#[cfg(windows)]
pub use wgc::WgcCapture;

/// A captured frame: 3-channel RGB, owned by the iteration that captured it.
pub type Frame = RgbImage;

/// Screen-space rectangle selecting the area to capture.
/// A zero width or height means "unset" and callers capture the full
/// primary display instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Capture backend requested by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Auto,
    Fast,
    Portable,
}

impl BackendKind {
    /// Parse the configuration selector. `"vulkan"` is an accepted alias
    /// for the portable backend, kept from earlier configs where the
    /// fast path could not capture Vulkan-rendered windows.
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "fast" => Ok(Self::Fast),
            "portable" | "vulkan" => Ok(Self::Portable),
            other => bail!("unknown capture backend: {other:?}"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Fast => "fast",
            Self::Portable => "portable",
        };
        f.write_str(name)
    }
}

/// Closed set of capture backends behind one capability interface.
pub enum CaptureBackend {
    /// Low-latency Windows.Graphics.Capture path.
    #[cfg(windows)]
    Fast(WgcCapture),
    /// Generic per-poll screenshot of the primary monitor.
    Portable(ScreenshotCapture),
    /// Pre-loaded frame sequence for development and tests.
    Replay(ReplayCapture),
}

impl CaptureBackend {
    /// Begin producing frames for `region` (`None` captures the full
    /// primary display). Not reentrant: call `stop` before starting again.
    pub fn start(&mut self, region: Option<Region>) -> Result<()> {
        match self {
            #[cfg(windows)]
            Self::Fast(b) => b.start(region),
            Self::Portable(b) => b.start(region),
            Self::Replay(b) => b.start(region),
        }
    }

    /// Non-blocking poll for the newest frame. `Ok(None)` means nothing
    /// is ready yet; callers poll again after a short sleep.
    pub fn get_latest_frame(&mut self) -> Result<Option<Frame>> {
        match self {
            #[cfg(windows)]
            Self::Fast(b) => b.get_latest_frame(),
            Self::Portable(b) => b.get_latest_frame(),
            Self::Replay(b) => b.get_latest_frame(),
        }
    }

    pub fn stop(&mut self) {
        match self {
            #[cfg(windows)]
            Self::Fast(b) => b.stop(),
            Self::Portable(b) => b.stop(),
            Self::Replay(b) => b.stop(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            #[cfg(windows)]
            Self::Fast(_) => "fast",
            Self::Portable(_) => "portable",
            Self::Replay(_) => "replay",
        }
    }
}

/// Build the backend named by `kind`. `Auto` tries the fast backend
/// first and falls back to portable; the last construction error is
/// surfaced only when every candidate fails.
pub fn build_backend(kind: BackendKind) -> Result<CaptureBackend> {
    let candidates: &[BackendKind] = match kind {
        BackendKind::Auto => &[BackendKind::Fast, BackendKind::Portable],
        BackendKind::Fast => &[BackendKind::Fast],
        BackendKind::Portable => &[BackendKind::Portable],
    };

    let mut last_error = None;
    for candidate in candidates {
        match construct(*candidate) {
            Ok(backend) => {
                info!("Capture backend selected: {}", backend.name());
                return Ok(backend);
            }
            Err(e) => {
                warn!("Failed to initialize {candidate} capture backend: {e:#}");
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| anyhow!("no backend candidates for {kind}"))
        .context(format!("no capture backend available ({kind})")))
}

fn construct(kind: BackendKind) -> Result<CaptureBackend> {
    match kind {
        #[cfg(windows)]
        BackendKind::Fast => Ok(CaptureBackend::Fast(WgcCapture::new()?)),
        #[cfg(not(windows))]
        BackendKind::Fast => bail!("the fast capture backend requires Windows graphics capture"),
        BackendKind::Portable => Ok(CaptureBackend::Portable(ScreenshotCapture::new()?)),
        BackendKind::Auto => unreachable!("auto is expanded before construction"),
    }
}

/// Screenshot-based backend. Grabs the primary monitor on every poll,
/// so a frame is always "ready" at a higher per-frame cost.
pub struct ScreenshotCapture {
    monitor: Monitor,
    region: Option<Region>,
}

impl ScreenshotCapture {
    pub fn new() -> Result<Self> {
        let monitor = primary_monitor()?;
        Ok(Self {
            monitor,
            region: None,
        })
    }

    fn start(&mut self, region: Option<Region>) -> Result<()> {
        self.region = region.filter(|r| {
            if r.is_empty() {
                debug!("Ignoring capture region with non-positive size: {r:?}");
                false
            } else {
                true
            }
        });
        Ok(())
    }

    fn get_latest_frame(&mut self) -> Result<Option<Frame>> {
        let shot = self
            .monitor
            .capture_image()
            .context("Failed to capture monitor image")?;

        let frame = match self.region {
            Some(region) => {
                // Region is in screen coordinates; translate into the
                // monitor-local pixel grid before cropping.
                let origin_x = self.monitor.x().unwrap_or(0);
                let origin_y = self.monitor.y().unwrap_or(0);
                crop_frame(
                    &shot,
                    region.x - origin_x,
                    region.y - origin_y,
                    region.width,
                    region.height,
                )
            }
            None => rgba_to_frame(&shot),
        };
        Ok(Some(frame))
    }

    fn stop(&mut self) {
        self.region = None;
    }
}

fn primary_monitor() -> Result<Monitor> {
    let monitors = Monitor::all().context("Failed to enumerate monitors")?;
    let mut first = None;
    for monitor in monitors {
        if monitor.is_primary().unwrap_or(false) {
            return Ok(monitor);
        }
        if first.is_none() {
            first = Some(monitor);
        }
    }
    first.ok_or_else(|| anyhow!("no monitor available for capture"))
}

/// Drop the alpha channel, keeping the 3-channel frame layout the
/// matching pipeline works on.
pub fn rgba_to_frame(img: &RgbaImage) -> Frame {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y);
        image::Rgb([p[0], p[1], p[2]])
    })
}

/// Crop an absolute pixel rectangle out of a captured image, clamped to
/// the image bounds, converting to the 3-channel frame layout.
pub fn crop_frame(img: &RgbaImage, x: i32, y: i32, width: u32, height: u32) -> Frame {
    let (w, h) = (img.width(), img.height());
    let x0 = (x.max(0) as u32).min(w.saturating_sub(1));
    let y0 = (y.max(0) as u32).min(h.saturating_sub(1));
    let cw = width.min(w - x0);
    let ch = height.min(h - y0);
    let cropped = image::imageops::crop_imm(img, x0, y0, cw, ch).to_image();
    rgba_to_frame(&cropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!(BackendKind::parse("auto").unwrap(), BackendKind::Auto);
        assert_eq!(BackendKind::parse("").unwrap(), BackendKind::Auto);
        assert_eq!(BackendKind::parse("Fast").unwrap(), BackendKind::Fast);
        assert_eq!(
            BackendKind::parse("portable").unwrap(),
            BackendKind::Portable
        );
        assert!(BackendKind::parse("dshow").is_err());
    }

    #[test]
    fn test_vulkan_alias_maps_to_portable() {
        assert_eq!(
            BackendKind::parse("vulkan").unwrap(),
            BackendKind::Portable
        );
    }

    #[test]
    fn test_region_emptiness() {
        assert!(Region::new(0, 0, 0, 40).is_empty());
        assert!(Region::new(10, 10, 40, 0).is_empty());
        assert!(!Region::new(-5, 3, 1, 1).is_empty());
    }

    #[test]
    fn test_rgba_to_frame_drops_alpha() {
        let img = RgbaImage::from_pixel(4, 2, image::Rgba([10, 20, 30, 0]));
        let frame = rgba_to_frame(&img);
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.get_pixel(3, 1).0, [10, 20, 30]);
    }

    #[test]
    fn test_crop_frame_exact_region() {
        let img = RgbaImage::from_fn(100, 80, |x, y| {
            image::Rgba([x as u8, y as u8, 0, 255])
        });
        let frame = crop_frame(&img, 10, 20, 30, 40);
        assert_eq!(frame.dimensions(), (30, 40));
        assert_eq!(frame.get_pixel(0, 0).0, [10, 20, 0]);
    }

    #[test]
    fn test_crop_frame_clamps_to_bounds() {
        let img = RgbaImage::new(100, 80);
        let frame = crop_frame(&img, 90, 70, 50, 50);
        assert_eq!(frame.dimensions(), (10, 10));

        let frame = crop_frame(&img, -20, -20, 30, 30);
        assert_eq!(frame.dimensions(), (30, 30));
    }
}
