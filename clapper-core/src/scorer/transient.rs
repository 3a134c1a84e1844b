//! Signal-statistics scorer: crest factor plus a peak gate.
//!
//! A clap inside a window is a short, loud transient over an otherwise
//! quieter background: the peak is high while the RMS stays moderate, so the
//! crest factor (peak / RMS) is large. Sustained content (speech, music)
//! keeps the crest factor low. This backend maps those two statistics onto
//! the label vocabulary the detection loop scores against.
//!
//! It is a stand-in with honest behavior — good enough to run the engine end
//! to end and to tune thresholds against, not a substitute for a trained
//! audio tagger.

use tracing::debug;

use crate::buffering::AudioWindow;
use crate::error::Result;
use crate::scorer::{AudioScorer, LabelScore};

/// Peak level below which the window counts as silent.
const DEFAULT_PEAK_GATE: f32 = 0.1;
/// Crest factor at which transient confidence starts rising.
const CREST_FLOOR: f32 = 3.0;
/// Crest factor at which transient confidence saturates at 1.0.
const CREST_SATURATION: f32 = 12.0;

/// Crest-factor clap scorer.
#[derive(Debug, Clone)]
pub struct TransientScorer {
    peak_gate: f32,
}

impl TransientScorer {
    pub fn new(peak_gate: f32) -> Self {
        Self { peak_gate }
    }
}

impl Default for TransientScorer {
    fn default() -> Self {
        Self::new(DEFAULT_PEAK_GATE)
    }
}

/// Root mean square of the samples. Returns 0.0 for empty input.
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

impl AudioScorer for TransientScorer {
    fn warm_up(&mut self) -> Result<()> {
        debug!("transient scorer ready — nothing to load");
        Ok(())
    }

    fn score(&mut self, window: &AudioWindow) -> Result<Vec<LabelScore>> {
        let samples = &window.samples;
        if samples.is_empty() {
            return Ok(vec![]);
        }

        let peak = samples.iter().fold(0f32, |m, s| m.max(s.abs()));
        let level = rms(samples);

        if peak < self.peak_gate || level <= f32::EPSILON {
            return Ok(vec![LabelScore {
                label: "Silence".to_string(),
                confidence: (1.0 - peak).clamp(0.0, 1.0),
            }]);
        }

        let crest = peak / level;
        let transient =
            ((crest - CREST_FLOOR) / (CREST_SATURATION - CREST_FLOOR)).clamp(0.0, 1.0);
        let loudness = peak.min(1.0);

        Ok(vec![
            LabelScore {
                label: "Clapping".to_string(),
                confidence: transient * loudness,
            },
            LabelScore {
                label: "Speech".to_string(),
                confidence: (1.0 - transient) * loudness,
            },
            LabelScore {
                label: "Silence".to_string(),
                confidence: (1.0 - loudness).clamp(0.0, 1.0),
            },
        ])
    }

    fn reset(&mut self) {}
}
