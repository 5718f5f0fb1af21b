use anyhow::{Context, Result};
use heat_capture::{build_backend, CaptureBackend, Frame};
use heat_vision::{DigitExtractor, Locator, MatchConfig, OcrEngine, TemplateStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::VisionConfig;

/// Sleep between polls while the backend has no frame ready.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Sleep between processing cycles.
const CYCLE_INTERVAL: Duration = Duration::from_millis(30);
/// Best-effort bound on waiting for the worker during `stop`.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Interface consumed by the overlay: start/stop acquisition and poll
/// the most recent reading without blocking.
pub trait HeatProvider {
    /// Begin acquisition. Idempotent; an error means no capture backend
    /// could be brought up.
    fn start(&mut self) -> Result<()>;
    /// End acquisition and release resources, best effort. Idempotent.
    fn stop(&mut self);
    /// Most recent heat value; `None` while no reading is available.
    fn get_heat(&self) -> Option<u32>;
}

/// Triangle-wave provider for development and demos.
pub struct SimulatedHeatProvider {
    pub minimum: u32,
    pub maximum: u32,
    pub period: Duration,
    started: Instant,
}

impl Default for SimulatedHeatProvider {
    fn default() -> Self {
        Self {
            minimum: 0,
            maximum: 60,
            period: Duration::from_secs(5),
            started: Instant::now(),
        }
    }
}

impl SimulatedHeatProvider {
    pub fn new(minimum: u32, maximum: u32, period: Duration) -> Self {
        Self {
            minimum,
            maximum,
            period,
            started: Instant::now(),
        }
    }
}

impl HeatProvider for SimulatedHeatProvider {
    fn start(&mut self) -> Result<()> {
        self.started = Instant::now();
        Ok(())
    }

    fn stop(&mut self) {}

    fn get_heat(&self) -> Option<u32> {
        let period = self.period.as_secs_f64().max(f64::EPSILON);
        let ratio = (self.started.elapsed().as_secs_f64() % period) / period;
        let span = self.maximum.saturating_sub(self.minimum) as f64;
        let value = self.minimum as f64 + span * (1.0 - 2.0 * ratio).abs();
        Some(value.round() as u32)
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done_rx: mpsc::Receiver<()>,
}

/// Vision-based provider: one background worker captures frames,
/// locates the icon template and reads the digits next to it,
/// publishing each reading into a shared slot.
pub struct VisionHeatProvider {
    config: VisionConfig,
    heat: Arc<Mutex<Option<u32>>>,
    stop: Arc<AtomicBool>,
    worker: Option<Worker>,
    staged_backend: Option<CaptureBackend>,
    staged_engine: Option<Box<dyn OcrEngine>>,
    callback: Option<Arc<dyn Fn(u32) + Send + Sync>>,
}

impl VisionHeatProvider {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            config,
            heat: Arc::new(Mutex::new(None)),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            staged_backend: None,
            staged_engine: None,
            callback: None,
        }
    }

    /// Use a pre-built capture backend for the next `start` instead of
    /// the configured selection. Used by tests and offline analysis
    /// with a replay source.
    pub fn with_backend(mut self, backend: CaptureBackend) -> Self {
        self.staged_backend = Some(backend);
        self
    }

    /// Substitute the OCR engine used by the next `start`.
    pub fn with_ocr_engine(mut self, engine: Box<dyn OcrEngine>) -> Self {
        self.staged_engine = Some(engine);
        self
    }

    /// Invoke `callback` from the worker for every published value.
    pub fn with_callback(mut self, callback: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }
}

impl HeatProvider for VisionHeatProvider {
    fn start(&mut self) -> Result<()> {
        if let Some(worker) = &self.worker {
            if !worker.handle.is_finished() {
                debug!("Acquisition already running; start ignored");
                return Ok(());
            }
            // Worker ended on its own (e.g. backend start failure);
            // reap it before spawning a replacement.
            let _ = self.worker.take().map(|w| w.handle.join());
        }

        let backend = match self.staged_backend.take() {
            Some(backend) => backend,
            None => build_backend(self.config.backend_kind()?)?,
        };

        self.stop.store(false, Ordering::Relaxed);
        let (done_tx, done_rx) = mpsc::channel();
        let worker = AcquisitionWorker {
            backend,
            config: self.config.clone(),
            match_config: self.config.match_config(),
            templates: TemplateStore::new(),
            locator: Locator::new(),
            extractor: self
                .staged_engine
                .take()
                .map(|e| DigitExtractor::with_engine(e, self.config.ocr_threshold)),
            ocr_unavailable_logged: false,
            heat: self.heat.clone(),
            stop: self.stop.clone(),
            callback: self.callback.clone(),
        };

        let handle = std::thread::Builder::new()
            .name("heat-acquisition".to_string())
            .spawn(move || {
                worker.run();
                let _ = done_tx.send(());
            })
            .context("Failed to spawn acquisition worker")?;

        self.worker = Some(Worker { handle, done_rx });
        Ok(())
    }

    fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.stop.store(true, Ordering::Relaxed);
        match worker.done_rx.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Acquisition worker did not stop within {JOIN_TIMEOUT:?}; detaching");
            }
        }
        let mut slot = self.heat.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    fn get_heat(&self) -> Option<u32> {
        *self.heat.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for VisionHeatProvider {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the background worker owns. Capture, matching and OCR
/// all happen on this one thread; only the heat slot is shared.
struct AcquisitionWorker {
    backend: CaptureBackend,
    config: VisionConfig,
    match_config: MatchConfig,
    templates: TemplateStore,
    locator: Locator,
    extractor: Option<DigitExtractor>,
    ocr_unavailable_logged: bool,
    heat: Arc<Mutex<Option<u32>>>,
    stop: Arc<AtomicBool>,
    callback: Option<Arc<dyn Fn(u32) + Send + Sync>>,
}

impl AcquisitionWorker {
    fn run(mut self) {
        if let Err(e) = self.backend.start(self.config.region()) {
            error!(
                "Failed to start {} capture backend: {e:#}",
                self.backend.name()
            );
            self.backend.stop();
            return;
        }
        info!("Heat acquisition started ({} backend)", self.backend.name());

        while !self.stop.load(Ordering::Relaxed) {
            let frame = match self.backend.get_latest_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Frame capture failed: {e:#}");
                    None
                }
            };
            let Some(frame) = frame else {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            };

            if let Some(value) = self.process_frame(&frame) {
                let mut slot = self.heat.lock().unwrap_or_else(|e| e.into_inner());
                *slot = Some(value);
                drop(slot);
                if let Some(callback) = &self.callback {
                    callback(value);
                }
            }
            std::thread::sleep(CYCLE_INTERVAL);
        }

        self.backend.stop();
        info!("Heat acquisition stopped");
    }

    /// One full cycle on a captured frame. `None` at any stage means no
    /// reading this cycle; the loop itself never terminates over it.
    fn process_frame(&mut self, frame: &Frame) -> Option<u32> {
        let template = self.templates.load(self.config.template_path.as_deref())?;

        let gray = image::imageops::grayscale(frame);
        let m = self.locator.find(&gray, &template.gray, &self.match_config)?;
        debug!(
            "Template matched at ({}, {}) scale {:.2} score {:.3}",
            m.x, m.y, m.scale, m.score
        );

        let Some(rel) = self.config.ocr_relative_rect else {
            debug!("OCR rect not configured");
            return None;
        };

        let extractor = match self.extractor_mut() {
            Some(extractor) => extractor,
            None => return None,
        };
        extractor.extract(frame, &m, template.dimensions(), &rel)
    }

    /// Build the OCR stage on first use, retrying on later cycles so an
    /// engine installed after startup is picked up without a restart.
    fn extractor_mut(&mut self) -> Option<&mut DigitExtractor> {
        if self.extractor.is_none() {
            match DigitExtractor::new(&self.config.ocr_config()) {
                Ok(extractor) => {
                    self.extractor = Some(extractor);
                    self.ocr_unavailable_logged = false;
                }
                Err(e) => {
                    if !self.ocr_unavailable_logged {
                        warn!("OCR engine unavailable: {e:#}");
                        self.ocr_unavailable_logged = true;
                    }
                    return None;
                }
            }
        }
        self.extractor.as_mut()
    }
}
