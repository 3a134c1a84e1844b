//! Detection loop: session ring → window assembly → scorer → events.
//!
//! ```text
//! SessionAudio.read_window()      [native rate, interleaved]
//!         │ downmix
//!         │ resample to target rate
//!         │ fit to exact window length
//!         ▼
//! AudioScorer::score()            [labelled confidences]
//!         │ composite = Σ positive − Σ negative
//!         ├─► LabelsEvent         [every scored window]
//!         └─► threshold + debounce ─► ClapEvent + webhook + clip dump
//! ```
//!
//! The loop runs on its own thread, polls a shared `running` flag, and owns
//! the session: when the flag drops it stops the session before exiting, so
//! engine shutdown is one store plus one join.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::audio::resample::{fit_length, resample};
use crate::audio::{downmix, wav};
use crate::buffering::AudioWindow;
use crate::engine::DetectionConfig;
use crate::events::{ClapEvent, LabelsEvent};
use crate::notify::WebhookNotifier;
use crate::scorer::{LabelScore, ScorerHandle};
use crate::session::AudioSession;

/// Labels whose confidence adds to the composite score.
pub const POSITIVE_LABELS: &[&str] = &["Hands", "Clapping", "Cap gun"];
/// Labels whose confidence subtracts; the classifier's usual confusions.
pub const NEGATIVE_LABELS: &[&str] = &["Finger snapping"];

/// How many labels a `LabelsEvent` carries.
const TOP_LABEL_COUNT: usize = 3;
/// Fraction of the inference interval slept per idle iteration, so stop
/// latency stays well under one interval.
const TICK_SLEEP_FACTOR: f64 = 0.05;
/// Buffer level is logged every this many scored windows.
const LEVEL_LOG_EVERY: u64 = 50;

/// Counters the detection loop bumps; cheap enough to read while running.
#[derive(Debug, Default)]
pub struct DetectorDiagnostics {
    pub ticks: AtomicUsize,
    pub windows_scored: AtomicUsize,
    pub scorer_errors: AtomicUsize,
    pub labels_emitted: AtomicUsize,
    pub claps_emitted: AtomicUsize,
    pub notifications_queued: AtomicUsize,
}

impl DetectorDiagnostics {
    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
        self.windows_scored.store(0, Ordering::Relaxed);
        self.scorer_errors.store(0, Ordering::Relaxed);
        self.labels_emitted.store(0, Ordering::Relaxed);
        self.claps_emitted.store(0, Ordering::Relaxed);
        self.notifications_queued.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            windows_scored: self.windows_scored.load(Ordering::Relaxed),
            scorer_errors: self.scorer_errors.load(Ordering::Relaxed),
            labels_emitted: self.labels_emitted.load(Ordering::Relaxed),
            claps_emitted: self.claps_emitted.load(Ordering::Relaxed),
            notifications_queued: self.notifications_queued.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticsSnapshot {
    pub ticks: usize,
    pub windows_scored: usize,
    pub scorer_errors: usize,
    pub labels_emitted: usize,
    pub claps_emitted: usize,
    pub notifications_queued: usize,
}

/// Everything the detection loop needs, bundled so the thread closure stays
/// tidy.
pub struct DetectorContext {
    /// Must be validated; `run` trusts the documented ranges.
    pub config: DetectionConfig,
    pub scorer: ScorerHandle,
    pub session: Box<dyn AudioSession>,
    pub running: Arc<AtomicBool>,
    pub clap_tx: broadcast::Sender<ClapEvent>,
    pub labels_tx: broadcast::Sender<LabelsEvent>,
    pub notifier: Option<WebhookNotifier>,
    pub seq: Arc<AtomicU64>,
    pub diagnostics: Arc<DetectorDiagnostics>,
}

/// Sum positive-label confidences, subtract negative-label confidences.
/// Labels outside both sets are ignored.
pub fn composite_score(labels: &[LabelScore]) -> f32 {
    let mut score = 0.0;
    for entry in labels {
        if POSITIVE_LABELS.contains(&entry.label.as_str()) {
            score += entry.confidence;
        } else if NEGATIVE_LABELS.contains(&entry.label.as_str()) {
            score -= entry.confidence;
        }
    }
    score
}

/// Highest-confidence labels, best first.
pub fn top_labels(labels: &[LabelScore], count: usize) -> Vec<LabelScore> {
    let mut sorted = labels.to_vec();
    sorted.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sorted.truncate(count);
    sorted
}

/// Debounce state: at most one accepted detection per cooldown period.
///
/// Only accepted events move the clock — rejected raises do not extend the
/// quiet period.
#[derive(Debug)]
pub struct DebounceGate {
    cooldown: Duration,
    last_event_at: Option<Instant>,
}

impl DebounceGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_event_at: None,
        }
    }

    /// True when strictly more than the cooldown has passed since the last
    /// accepted event (or there was none); accepting records `now`.
    pub fn try_accept(&mut self, now: Instant) -> bool {
        match self.last_event_at {
            Some(last) if now.saturating_duration_since(last) <= self.cooldown => false,
            _ => {
                self.last_event_at = Some(now);
                true
            }
        }
    }
}

/// Directory for WAV dumps of accepted detections, from `CLAPPER_CLIP_DIR`.
/// Resolved once; unset means no dumps.
fn clip_dir() -> Option<&'static Path> {
    static CLIP_DIR: OnceLock<Option<PathBuf>> = OnceLock::new();
    CLIP_DIR
        .get_or_init(|| std::env::var_os("CLAPPER_CLIP_DIR").map(PathBuf::from))
        .as_deref()
}

fn save_clip(seq: u64, window: &AudioWindow) {
    let Some(dir) = clip_dir() else { return };
    let path = dir.join(format!("clap-{seq}.wav"));
    match wav::write_wav(&path, &window.samples, window.sample_rate) {
        Ok(()) => debug!(path = %path.display(), "saved detection clip"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to save detection clip"),
    }
}

fn emit_clap(ctx: &DetectorContext, source_id: &str, window: &AudioWindow, score: f32) {
    let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
    let event = ClapEvent {
        seq,
        source_id: source_id.to_string(),
        timestamp: window.unix_timestamp(),
        score,
    };
    ctx.diagnostics.claps_emitted.fetch_add(1, Ordering::Relaxed);
    info!(source = source_id, seq, score, "clap detected");

    if let Some(notifier) = ctx.notifier.as_ref() {
        notifier.notify(&event);
        ctx.diagnostics
            .notifications_queued
            .fetch_add(1, Ordering::Relaxed);
    }
    save_clip(seq, window);
    // No subscribers is fine; events are telemetry, not control flow.
    let _ = ctx.clap_tx.send(event);
}

/// Run the detection loop until `ctx.running` drops.
///
/// Blocking; the engine spawns this on a dedicated thread. Owns the session
/// and stops it on the way out.
pub fn run(mut ctx: DetectorContext) {
    let source_id = ctx.session.source_id().to_string();
    let audio = ctx.session.audio();
    let interval = ctx.config.inference_interval();
    let idle_sleep =
        Duration::from_secs_f64((interval.as_secs_f64() * TICK_SLEEP_FACTOR).max(0.001));
    let window_duration = Duration::from_secs_f64(ctx.config.window_duration);
    let window_samples = ctx.config.window_samples();
    let mut gate = DebounceGate::new(Duration::from_secs_f64(ctx.config.cooldown_seconds));
    let mut labels_seq = 0u64;
    let mut last_tick: Option<Instant> = None;

    info!(
        source = source_id.as_str(),
        interval_ms = interval.as_millis() as u64,
        window_samples,
        threshold = ctx.config.threshold,
        "detection loop started"
    );

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        let now = Instant::now();
        let due = last_tick.map_or(true, |t| now.duration_since(t) >= interval);
        if !due {
            std::thread::sleep(idle_sleep);
            continue;
        }
        last_tick = Some(now);
        ctx.diagnostics.ticks.fetch_add(1, Ordering::Relaxed);

        // Window assembly: native read, downmix, rate-convert, length-fit.
        let Some(native) = audio.read_window(window_duration) else {
            // Source has not produced its first audio yet (VBAN before the
            // first accepted packet). Not an error, just nothing to score.
            std::thread::sleep(idle_sleep);
            continue;
        };

        let mono = downmix(&native.samples, native.format.channels as usize);
        let converted = match resample(
            &mono,
            native.format.sample_rate,
            ctx.config.target_sample_rate,
        ) {
            Ok(samples) => samples,
            Err(e) => {
                error!(source = source_id.as_str(), error = %e, "window resample failed");
                continue;
            }
        };
        let window = AudioWindow::new(
            fit_length(converted, window_samples),
            ctx.config.target_sample_rate,
            SystemTime::now(),
        );

        // Lock held for the call only; the scorer never runs concurrently.
        let labels = {
            let mut scorer = ctx.scorer.0.lock();
            match scorer.score(&window) {
                Ok(labels) => labels,
                Err(e) => {
                    ctx.diagnostics.scorer_errors.fetch_add(1, Ordering::Relaxed);
                    error!(source = source_id.as_str(), error = %e, "scorer failed for window");
                    continue;
                }
            }
        };
        ctx.diagnostics
            .windows_scored
            .fetch_add(1, Ordering::Relaxed);

        if labels_seq % LEVEL_LOG_EVERY == 0 {
            debug!(
                source = source_id.as_str(),
                level = audio.level(),
                native_rate = native.format.sample_rate,
                "buffer level"
            );
        }

        let labels_event = LabelsEvent {
            seq: labels_seq,
            detected: top_labels(&labels, TOP_LABEL_COUNT),
        };
        labels_seq = labels_seq.saturating_add(1);
        ctx.diagnostics.labels_emitted.fetch_add(1, Ordering::Relaxed);
        let _ = ctx.labels_tx.send(labels_event);

        let score = composite_score(&labels);
        if score > ctx.config.threshold && gate.try_accept(now) {
            emit_clap(&ctx, &source_id, &window, score);
        }
    }

    ctx.session.stop();

    let snap = ctx.diagnostics.snapshot();
    info!(
        source = source_id.as_str(),
        ticks = snap.ticks,
        windows_scored = snap.windows_scored,
        scorer_errors = snap.scorer_errors,
        claps_emitted = snap.claps_emitted,
        "detection loop stopped"
    );
}
