//! `ClapEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! ClapEngine::new(scorer)
//!     └─► start(source, config)  → scorer warmed, session open, detector
//!         │                        spawned, status = Listening
//!         ├─► start(other, _)    → active session replaced in place
//!         └─► stop()             → running=false, detector joined,
//!                                  status = Stopped
//! ```
//!
//! `start()` on a running engine stops the current session first and then
//! brings up the new one, so callers can switch sources without an explicit
//! stop/start dance. `stop()` on an idle engine is a no-op.
//!
//! ## Threading
//!
//! The engine itself is `Send + Sync` (interior mutability throughout); the
//! detection loop runs on a dedicated `clapper-detect` thread that owns the
//! session. Stopping is a flag store followed by a bounded join — the session
//! producer threads are joined by the detector on its way out.

pub mod detector;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::{
    error::{ClapperError, Result},
    events::{ClapEvent, EngineStatus, EngineStatusEvent, LabelsEvent},
    notify::WebhookNotifier,
    protocol::registry::{RemoteSource, SourceRegistry},
    scorer::ScorerHandle,
    session::{self, AudioSource},
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// How long `stop()` waits for the detection thread before detaching it.
const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Detection parameters.
///
/// Serde-friendly so hosts can persist it or accept it over HTTP; unknown
/// fields fall back to defaults, so old configs keep loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionConfig {
    /// Composite score a window must exceed to count as a clap. In `[0, 1]`.
    /// Default: 0.5.
    pub threshold: f32,
    /// Quiet period after an accepted detection (seconds). Default: 1.0.
    pub cooldown_seconds: f64,
    /// Scored window length (seconds). Default: 1.0.
    pub window_duration: f64,
    /// How much consecutive windows overlap, in `(0, 1)` exclusive.
    /// 0.5 means a new window every half window. Default: 0.5.
    pub overlap_factor: f64,
    /// Rate windows are converted to before scoring (Hz). Default: 16000.
    pub target_sample_rate: u32,
    /// POSTed to on every accepted detection when set.
    pub webhook_url: Option<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            cooldown_seconds: 1.0,
            window_duration: 1.0,
            overlap_factor: 0.5,
            target_sample_rate: 16_000,
            webhook_url: None,
        }
    }
}

impl DetectionConfig {
    /// Time between scored windows: `window_duration × (1 − overlap_factor)`.
    pub fn inference_interval(&self) -> Duration {
        Duration::from_secs_f64(self.window_duration * (1.0 - self.overlap_factor))
    }

    /// Window length in samples at the target rate.
    pub fn window_samples(&self) -> usize {
        (self.window_duration * f64::from(self.target_sample_rate)).round() as usize
    }

    /// Reject configs the detection loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(ClapperError::Config(format!(
                "threshold must be in [0, 1], got {}",
                self.threshold
            )));
        }
        if !self.cooldown_seconds.is_finite() || self.cooldown_seconds < 0.0 {
            return Err(ClapperError::Config(format!(
                "cooldownSeconds must be non-negative, got {}",
                self.cooldown_seconds
            )));
        }
        if !self.window_duration.is_finite() || self.window_duration <= 0.0 {
            return Err(ClapperError::Config(format!(
                "windowDuration must be positive, got {}",
                self.window_duration
            )));
        }
        if !self.overlap_factor.is_finite()
            || self.overlap_factor <= 0.0
            || self.overlap_factor >= 1.0
        {
            return Err(ClapperError::Config(format!(
                "overlapFactor must be strictly between 0 and 1, got {}",
                self.overlap_factor
            )));
        }
        if self.target_sample_rate == 0 {
            return Err(ClapperError::Config(
                "targetSampleRate must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// The top-level engine handle.
///
/// `ClapEngine` is `Send + Sync` — all fields use interior mutability. Wrap
/// in `Arc<ClapEngine>` to share between host state and event-forwarding
/// tasks.
pub struct ClapEngine {
    scorer: ScorerHandle,
    /// VBAN discovery state, shared with whichever session is active.
    registry: Arc<SourceRegistry>,
    /// `true` while a session + detection loop are active.
    running: Arc<AtomicBool>,
    /// Canonical status (written under Mutex, broadcast on change).
    status: Arc<Mutex<EngineStatus>>,
    /// Identifier of the active source, for host display.
    active_source: Mutex<Option<String>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    clap_tx: broadcast::Sender<ClapEvent>,
    labels_tx: broadcast::Sender<LabelsEvent>,
    status_tx: broadcast::Sender<EngineStatusEvent>,
    /// Monotonically increasing clap sequence counter.
    seq: Arc<AtomicU64>,
    /// Shared detection loop counters.
    diagnostics: Arc<detector::DetectorDiagnostics>,
}

impl ClapEngine {
    /// Create a new engine. Does not open any source — call `start()`.
    pub fn new(scorer: ScorerHandle) -> Self {
        let (clap_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (labels_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            scorer,
            registry: Arc::new(SourceRegistry::new()),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            active_source: Mutex::new(None),
            worker: Mutex::new(None),
            clap_tx,
            labels_tx,
            status_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(detector::DetectorDiagnostics::default()),
        }
    }

    /// Open `source` and run detection with `config`.
    ///
    /// Blocks until the source is confirmed open (or fails), then returns;
    /// detection continues on a background thread. A running engine is
    /// stopped first, so this doubles as "switch source".
    ///
    /// # Errors
    /// - `ClapperError::Config` if `config` fails validation.
    /// - `ClapperError::Scorer` if scorer warm-up fails.
    /// - Source open errors (`AudioDevice`, `NoInputDevice`, `Io`, …).
    pub fn start(&self, source: &AudioSource, config: DetectionConfig) -> Result<()> {
        config.validate()?;

        if self.running.load(Ordering::SeqCst) {
            info!(source = %source.id(), "replacing active session");
            self.stop();
        }

        let notifier = match config.webhook_url.as_deref() {
            Some(url) => Some(WebhookNotifier::new(url.to_string())?),
            None => None,
        };

        let mut session =
            session::build(source, config.window_duration, Arc::clone(&self.registry));
        let source_id = session.source_id().to_string();

        self.set_status(EngineStatus::WarmingUp, None);
        if let Err(e) = self.scorer.0.lock().warm_up() {
            self.set_status(EngineStatus::Error, Some(e.to_string()));
            return Err(e);
        }

        if let Err(e) = session.start() {
            self.set_status(EngineStatus::Error, Some(e.to_string()));
            return Err(e);
        }

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);

        let ctx = detector::DetectorContext {
            config,
            scorer: self.scorer.clone(),
            session,
            running: Arc::clone(&self.running),
            clap_tx: self.clap_tx.clone(),
            labels_tx: self.labels_tx.clone(),
            notifier,
            seq: Arc::clone(&self.seq),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        let handle = match std::thread::Builder::new()
            .name("clapper-detect".into())
            .spawn(move || detector::run(ctx))
        {
            Ok(handle) => handle,
            Err(e) => {
                // The failed spawn dropped ctx, and the session with it.
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                return Err(ClapperError::Io(e));
            }
        };

        *self.worker.lock() = Some(handle);
        *self.active_source.lock() = Some(source_id.clone());
        self.set_status(EngineStatus::Listening, None);
        info!(source = source_id.as_str(), "engine started — listening");
        Ok(())
    }

    /// Stop detection and release the source. No-op when idle.
    ///
    /// Waits up to a few seconds for the detection thread; a thread that
    /// fails to stop in time is detached rather than blocking the caller.
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if worker.is_none() && !was_running {
            return;
        }

        if let Some(handle) = worker {
            let deadline = Instant::now() + STOP_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    error!("detection thread panicked");
                }
            } else {
                warn!(
                    timeout_secs = STOP_TIMEOUT.as_secs(),
                    "detection thread still busy, detaching"
                );
            }
        }

        *self.active_source.lock() = None;
        self.set_status(EngineStatus::Stopped, None);
        info!("engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Identifier of the active source, if any.
    pub fn active_source(&self) -> Option<String> {
        self.active_source.lock().clone()
    }

    /// VBAN senders seen recently, sorted by address.
    pub fn sources(&self) -> Vec<RemoteSource> {
        self.registry.snapshot()
    }

    /// Shared discovery registry, for hosts that run their own listener.
    pub fn registry(&self) -> Arc<SourceRegistry> {
        Arc::clone(&self.registry)
    }

    /// Subscribe to accepted detections.
    pub fn subscribe_claps(&self) -> broadcast::Receiver<ClapEvent> {
        self.clap_tx.subscribe()
    }

    /// Subscribe to per-window label scores.
    pub fn subscribe_labels(&self) -> broadcast::Receiver<LabelsEvent> {
        self.labels_tx.subscribe()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of detection loop counters for observability.
    pub fn diagnostics_snapshot(&self) -> detector::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for ClapEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
