use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Template-search tuning knobs, supplied by the external configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Pixels added on every side of the tracked rectangle before the
    /// narrowed re-search.
    pub search_margin: u32,
    /// Number of scale hypotheses tried per search, centered on 1.0.
    pub scale_steps: u32,
    /// Spacing between neighboring scale hypotheses.
    pub scale_factor: f64,
    /// Minimum correlation score accepted as a valid match.
    pub match_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            search_margin: 16,
            scale_steps: 3,
            scale_factor: 0.12,
            match_threshold: 0.75,
        }
    }
}

/// A located template instance, in full-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub x: i64,
    pub y: i64,
    /// Scale applied to the template for this match.
    pub scale: f64,
    /// Normalized cross-correlation score in [-1, 1].
    pub score: f64,
}

#[derive(Debug, Clone, Copy)]
struct TrackRect {
    x: i64,
    y: i64,
    width: u32,
    height: u32,
}

struct ScaledTemplate {
    scale: f64,
    image: GrayImage,
    mean: f64,
    std_dev: f64,
}

/// Finds the template in captured frames. Keeps the last match
/// rectangle privately and searches an expanded window around it first,
/// falling back to the full frame so a lost target is re-acquired.
#[derive(Default)]
pub struct Locator {
    tracking: Option<TrackRect>,
}

impl Locator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last successful match rectangle `(x, y, w, h)`, if any. Search
    /// hint only; never part of the output.
    pub fn tracking_rect(&self) -> Option<(i64, i64, u32, u32)> {
        self.tracking.map(|t| (t.x, t.y, t.width, t.height))
    }

    /// Best match of `template` in `frame` at or above the configured
    /// threshold, or `None`. Updates the tracking rectangle on success
    /// and clears it on failure.
    pub fn find(
        &mut self,
        frame: &GrayImage,
        template: &GrayImage,
        config: &MatchConfig,
    ) -> Option<MatchResult> {
        let scaled = prepare_scales(template, config);
        if scaled.is_empty() {
            debug!(
                "No usable scale hypotheses for {}x{} template",
                template.width(),
                template.height()
            );
            self.tracking = None;
            return None;
        }

        let mut best = None;
        if let Some(track) = self.tracking {
            if let Some((window, offset)) = tracked_window(frame, &track, config.search_margin) {
                best = search_area(&window, offset, &scaled, config.match_threshold);
                if best.is_none() {
                    trace!("Tracked window missed; retrying over the full frame");
                }
            }
        }
        if best.is_none() {
            best = search_area(frame, (0, 0), &scaled, config.match_threshold);
        }

        match best {
            Some(m) => {
                let (tw, th) = template.dimensions();
                self.tracking = Some(TrackRect {
                    x: m.x,
                    y: m.y,
                    width: (tw as f64 * m.scale) as u32,
                    height: (th as f64 * m.scale) as u32,
                });
                Some(m)
            }
            None => {
                self.tracking = None;
                None
            }
        }
    }
}

/// Scale hypotheses `1.0 + scale_factor * (step - steps/2)`, ordered by
/// distance from 1.0 so that equal scores keep the most neutral scale.
fn scale_hypotheses(config: &MatchConfig) -> Vec<f64> {
    let half = (config.scale_steps / 2) as i64;
    let mut scales: Vec<f64> = (0..config.scale_steps as i64)
        .map(|step| 1.0 + config.scale_factor * (step - half) as f64)
        .filter(|s| *s > 0.0)
        .collect();
    scales.sort_by(|a, b| (a - 1.0).abs().total_cmp(&(b - 1.0).abs()));
    scales
}

fn prepare_scales(template: &GrayImage, config: &MatchConfig) -> Vec<ScaledTemplate> {
    let (tw, th) = template.dimensions();
    scale_hypotheses(config)
        .into_iter()
        .filter_map(|scale| {
            let w = (tw as f64 * scale).round() as u32;
            let h = (th as f64 * scale).round() as u32;
            if w == 0 || h == 0 {
                return None;
            }
            let image = if (w, h) == (tw, th) {
                template.clone()
            } else {
                image::imageops::resize(template, w, h, image::imageops::FilterType::CatmullRom)
            };
            let (mean, std_dev) = compute_stats(&image);
            Some(ScaledTemplate {
                scale,
                image,
                mean,
                std_dev,
            })
        })
        .collect()
}

/// Tracked rectangle expanded by the margin on all sides and clipped to
/// the frame. Returns the cropped sub-image and its full-frame offset.
fn tracked_window(
    frame: &GrayImage,
    track: &TrackRect,
    margin: u32,
) -> Option<(GrayImage, (i64, i64))> {
    let (fw, fh) = (frame.width() as i64, frame.height() as i64);
    let margin = margin as i64;
    let x0 = (track.x - margin).max(0);
    let y0 = (track.y - margin).max(0);
    let x1 = (track.x + track.width as i64 + margin).min(fw);
    let y1 = (track.y + track.height as i64 + margin).min(fh);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let window = image::imageops::crop_imm(
        frame,
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    )
    .to_image();
    Some((window, (x0, y0)))
}

/// Best template position across all scale hypotheses within one search
/// area. Strict `>` keeps the earlier (more neutral) scale on ties.
fn search_area(
    area: &GrayImage,
    offset: (i64, i64),
    scaled: &[ScaledTemplate],
    threshold: f64,
) -> Option<MatchResult> {
    let mut best: Option<MatchResult> = None;
    for st in scaled {
        if area.width() < st.image.width() || area.height() < st.image.height() {
            continue;
        }
        let Some((x, y, score)) = best_correlation(area, &st.image, st.mean, st.std_dev) else {
            continue;
        };
        if score < threshold {
            continue;
        }
        if best.map_or(true, |b| score > b.score) {
            best = Some(MatchResult {
                x: x as i64 + offset.0,
                y: y as i64 + offset.1,
                scale: st.scale,
                score,
            });
        }
    }
    best
}

/// Slide the template over the area and return the position with the
/// highest zero-mean normalized cross-correlation.
fn best_correlation(
    area: &GrayImage,
    tmpl: &GrayImage,
    tmpl_mean: f64,
    tmpl_std: f64,
) -> Option<(u32, u32, f64)> {
    if tmpl_std < 1e-10 {
        // A flat template correlates with nothing.
        return None;
    }

    let (aw, ah) = area.dimensions();
    let (tw, th) = tmpl.dimensions();
    let n = (tw * th) as f64;
    let (sums, squares) = integral_images(area);

    let mut best: Option<(u32, u32, f64)> = None;
    for y in 0..=(ah - th) {
        for x in 0..=(aw - tw) {
            let s = window_sum(&sums, aw, x, y, tw, th);
            let s2 = window_sum(&squares, aw, x, y, tw, th);
            let mean = s / n;
            let variance = (s2 / n - mean * mean).max(0.0);
            let denom = variance.sqrt() * tmpl_std;
            if denom < 1e-10 {
                continue;
            }

            let mut cross = 0.0;
            for ty in 0..th {
                for tx in 0..tw {
                    let ap = area.get_pixel(x + tx, y + ty)[0] as f64;
                    let tp = tmpl.get_pixel(tx, ty)[0] as f64;
                    cross += (ap - mean) * (tp - tmpl_mean);
                }
            }
            let score = cross / (n * denom);
            if best.map_or(true, |(_, _, b)| score > b) {
                best = Some((x, y, score));
            }
        }
    }
    best
}

/// Mean and standard deviation of pixel values.
fn compute_stats(img: &GrayImage) -> (f64, f64) {
    let n = (img.width() * img.height()) as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = img.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
    let variance = img
        .pixels()
        .map(|p| (p[0] as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

/// Summed-area tables of pixel values and their squares, with a zero
/// border row/column, for O(1) window statistics.
fn integral_images(img: &GrayImage) -> (Vec<f64>, Vec<f64>) {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let stride = w + 1;
    let mut sums = vec![0.0; stride * (h + 1)];
    let mut squares = vec![0.0; stride * (h + 1)];
    for y in 0..h {
        let mut row = 0.0;
        let mut row_sq = 0.0;
        for x in 0..w {
            let v = img.get_pixel(x as u32, y as u32)[0] as f64;
            row += v;
            row_sq += v * v;
            sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            squares[(y + 1) * stride + x + 1] = squares[y * stride + x + 1] + row_sq;
        }
    }
    (sums, squares)
}

fn window_sum(table: &[f64], area_width: u32, x: u32, y: u32, w: u32, h: u32) -> f64 {
    let stride = area_width as usize + 1;
    let (x0, y0) = (x as usize, y as usize);
    let (x1, y1) = (x0 + w as usize, y0 + h as usize);
    table[y1 * stride + x1] - table[y0 * stride + x1] - table[y1 * stride + x0]
        + table[y0 * stride + x0]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            image::Luma([(x.wrapping_mul(13).wrapping_add(y.wrapping_mul(29)) % 251) as u8])
        })
    }

    fn frame_with_patch(patch: &GrayImage, px: u32, py: u32) -> GrayImage {
        let mut frame = GrayImage::from_pixel(160, 120, image::Luma([32]));
        image::imageops::overlay(&mut frame, patch, px as i64, py as i64);
        frame
    }

    #[test]
    fn test_scale_hypotheses_ordered_from_neutral() {
        let config = MatchConfig::default();
        let scales = scale_hypotheses(&config);
        assert_eq!(scales.len(), 3);
        assert!((scales[0] - 1.0).abs() < 1e-12);
        for pair in scales.windows(2) {
            assert!((pair[0] - 1.0).abs() <= (pair[1] - 1.0).abs());
        }
    }

    #[test]
    fn test_ncc_identical_is_one() {
        let img = patch(20, 20);
        let (mean, std) = compute_stats(&img);
        let (x, y, score) = best_correlation(&img, &img, mean, std).unwrap();
        assert_eq!((x, y), (0, 0));
        assert!((score - 1.0).abs() < 1e-6, "got {score}");
    }

    #[test]
    fn test_find_locates_patch_at_neutral_scale() {
        let tmpl = patch(16, 16);
        let frame = frame_with_patch(&tmpl, 40, 30);
        let mut locator = Locator::new();

        let m = locator
            .find(&frame, &tmpl, &MatchConfig::default())
            .expect("patch present");
        assert_eq!((m.x, m.y), (40, 30));
        assert!((m.scale - 1.0).abs() < 1e-12);
        assert!(m.score > 0.99);
        assert_eq!(locator.tracking_rect(), Some((40, 30, 16, 16)));
    }

    #[test]
    fn test_no_match_below_threshold() {
        let tmpl = patch(16, 16);
        // A different texture with real variance, so candidate windows
        // are scored rather than skipped.
        let other = GrayImage::from_fn(16, 16, |x, y| {
            image::Luma([(x.wrapping_mul(41).wrapping_add(y.wrapping_mul(3)) % 199) as u8])
        });
        let frame = frame_with_patch(&other, 40, 30);
        let mut locator = Locator::new();
        let config = MatchConfig {
            match_threshold: 0.995,
            ..MatchConfig::default()
        };

        assert!(locator.find(&frame, &tmpl, &config).is_none());
        assert!(locator.tracking_rect().is_none());
    }

    #[test]
    fn test_tracking_follows_small_move() {
        let tmpl = patch(16, 16);
        let mut locator = Locator::new();
        let config = MatchConfig::default();

        locator
            .find(&frame_with_patch(&tmpl, 40, 30), &tmpl, &config)
            .unwrap();
        let m = locator
            .find(&frame_with_patch(&tmpl, 48, 36), &tmpl, &config)
            .expect("still inside the expanded window");
        assert_eq!((m.x, m.y), (48, 36));
        assert_eq!(locator.tracking_rect(), Some((48, 36, 16, 16)));
    }

    #[test]
    fn test_full_frame_fallback_reacquires_target() {
        let tmpl = patch(16, 16);
        let mut locator = Locator::new();
        let config = MatchConfig::default();

        locator
            .find(&frame_with_patch(&tmpl, 10, 10), &tmpl, &config)
            .unwrap();
        // Far outside the 16px margin around the last rectangle.
        let m = locator
            .find(&frame_with_patch(&tmpl, 120, 90), &tmpl, &config)
            .expect("full-frame fallback");
        assert_eq!((m.x, m.y), (120, 90));
    }

    #[test]
    fn test_miss_clears_tracking() {
        let tmpl = patch(16, 16);
        let mut locator = Locator::new();
        let config = MatchConfig::default();

        locator
            .find(&frame_with_patch(&tmpl, 40, 30), &tmpl, &config)
            .unwrap();
        let blank = GrayImage::from_pixel(160, 120, image::Luma([32]));
        assert!(locator.find(&blank, &tmpl, &config).is_none());
        assert!(locator.tracking_rect().is_none());
    }
}
