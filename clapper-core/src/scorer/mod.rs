//! Acoustic scoring abstraction.
//!
//! `AudioScorer` decouples the detection loop from any particular classifier
//! backend. The production backend is expected to be an audio tagger with a
//! label vocabulary covering claps ("Hands", "Clapping", "Cap gun"); the
//! built-in [`transient::TransientScorer`] is a signal-statistics stand-in
//! that speaks the same vocabulary.

pub mod transient;

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffering::AudioWindow;
use crate::error::Result;

/// One labelled confidence from a scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelScore {
    /// Classifier vocabulary label, e.g. `"Clapping"`.
    pub label: String,
    /// Confidence in [0.0, 1.0].
    pub confidence: f32,
}

/// Contract for classification backends.
///
/// `&mut self` on `score` intentionally expresses that backends are stateful
/// (model sessions, feature history). All calls are serialized through
/// [`ScorerHandle`], so implementations never see concurrent invocations.
pub trait AudioScorer: Send + 'static {
    /// One-time preparation: load weights, run a dummy pass. Called before
    /// a session starts producing audio; failure aborts the start.
    fn warm_up(&mut self) -> Result<()>;

    /// Score one mono window, returning labelled confidences.
    /// An empty result is valid (nothing recognised).
    fn score(&mut self, window: &AudioWindow) -> Result<Vec<LabelScore>>;

    /// Drop accumulated state between sessions.
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `AudioScorer` implementor.
///
/// `parking_lot::Mutex` because it does not poison on panic; the detection
/// loop takes this lock exactly once per tick.
#[derive(Clone)]
pub struct ScorerHandle(pub Arc<Mutex<dyn AudioScorer>>);

impl ScorerHandle {
    pub fn new<S: AudioScorer>(scorer: S) -> Self {
        Self(Arc::new(Mutex::new(scorer)))
    }
}

impl std::fmt::Debug for ScorerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScorerHandle").finish_non_exhaustive()
    }
}
