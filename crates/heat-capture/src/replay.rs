use crate::{Frame, Region};
use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info};

/// Frame source that replays a pre-loaded sequence, one frame per poll,
/// behind the same interface as the live backends. Used by tests and by
/// offline analysis of saved captures; not reachable from the
/// configuration selector.
pub struct ReplayCapture {
    frames: VecDeque<Frame>,
    region: Option<Region>,
}

impl ReplayCapture {
    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            region: None,
        }
    }

    /// Load a single saved capture from disk.
    pub fn from_image_path(path: &Path) -> Result<Self> {
        let img = image::open(path)
            .with_context(|| format!("Failed to open frame image {}", path.display()))?
            .to_rgb8();
        info!(
            "Replay source loaded {} ({}x{})",
            path.display(),
            img.width(),
            img.height()
        );
        Ok(Self::from_frames(vec![img]))
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn start(&mut self, region: Option<Region>) -> Result<()> {
        self.region = region.filter(|r| !r.is_empty());
        Ok(())
    }

    pub(crate) fn get_latest_frame(&mut self) -> Result<Option<Frame>> {
        let Some(frame) = self.frames.pop_front() else {
            return Ok(None);
        };
        let frame = match self.region {
            // The replayed material is already frame-sized; crop the way a
            // live backend would when a sub-region is requested.
            Some(region) => crop_rgb(&frame, region),
            None => frame,
        };
        Ok(Some(frame))
    }

    pub(crate) fn stop(&mut self) {
        debug!("Replay source stopped with {} frames left", self.frames.len());
        self.frames.clear();
        self.region = None;
    }
}

fn crop_rgb(frame: &Frame, region: Region) -> Frame {
    let (w, h) = frame.dimensions();
    let x0 = (region.x.max(0) as u32).min(w.saturating_sub(1));
    let y0 = (region.y.max(0) as u32).min(h.saturating_sub(1));
    let cw = region.width.min(w - x0);
    let ch = region.height.min(h - y0);
    image::imageops::crop_imm(frame, x0, y0, cw, ch).to_image()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_replay_drains_in_order() {
        let a = RgbImage::from_pixel(2, 2, image::Rgb([1, 1, 1]));
        let b = RgbImage::from_pixel(2, 2, image::Rgb([2, 2, 2]));
        let mut replay = ReplayCapture::from_frames(vec![a, b]);
        replay.start(None).unwrap();

        assert_eq!(replay.get_latest_frame().unwrap().unwrap().get_pixel(0, 0).0, [1, 1, 1]);
        assert_eq!(replay.get_latest_frame().unwrap().unwrap().get_pixel(0, 0).0, [2, 2, 2]);
        assert!(replay.get_latest_frame().unwrap().is_none());
    }

    #[test]
    fn test_replay_applies_region() {
        let frame = RgbImage::from_fn(8, 8, |x, y| image::Rgb([x as u8, y as u8, 0]));
        let mut replay = ReplayCapture::from_frames(vec![frame]);
        replay.start(Some(Region::new(2, 3, 4, 2))).unwrap();

        let out = replay.get_latest_frame().unwrap().unwrap();
        assert_eq!(out.dimensions(), (4, 2));
        assert_eq!(out.get_pixel(0, 0).0, [2, 3, 0]);
    }

    #[test]
    fn test_stop_clears_queue() {
        let frame = RgbImage::new(2, 2);
        let mut replay = ReplayCapture::from_frames(vec![frame]);
        replay.start(None).unwrap();
        replay.stop();
        assert_eq!(replay.remaining(), 0);
        assert!(replay.get_latest_frame().unwrap().is_none());
    }
}
