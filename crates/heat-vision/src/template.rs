use image::{GrayImage, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{error, info, warn};

/// Reference icon image, decoded once and shared read-only with the
/// locator.
pub struct Template {
    pub color: RgbImage,
    pub gray: GrayImage,
}

impl Template {
    pub fn dimensions(&self) -> (u32, u32) {
        self.gray.dimensions()
    }
}

struct CacheEntry {
    path: PathBuf,
    mtime: Option<SystemTime>,
    template: Arc<Template>,
}

/// Loads and caches the template image, invalidated by the file's
/// modification time. A missing or unreadable template is a
/// configuration problem, not a fault: the caller skips the cycle.
#[derive(Default)]
pub struct TemplateStore {
    cached: Option<CacheEntry>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, path: Option<&Path>) -> Option<Arc<Template>> {
        let Some(path) = path else {
            warn!("Template path not configured");
            return None;
        };
        if !path.exists() {
            warn!("Template path missing: {}", path.display());
            return None;
        }

        let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        if let Some(entry) = &self.cached {
            if entry.path == path && mtime.is_some() && entry.mtime == mtime {
                return Some(entry.template.clone());
            }
        }

        let img = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                error!("Failed to load template from {}: {e}", path.display());
                return None;
            }
        };
        let template = Arc::new(Template {
            color: img.to_rgb8(),
            gray: img.to_luma8(),
        });
        info!(
            "Loaded template {} ({}x{})",
            path.display(),
            template.gray.width(),
            template.gray.height()
        );
        self.cached = Some(CacheEntry {
            path: path.to_path_buf(),
            mtime,
            template: template.clone(),
        });
        Some(template)
    }
}
