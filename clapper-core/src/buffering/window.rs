//! Typed audio window handed from the buffering stage to the scorer.

use std::time::SystemTime;

/// A fixed-duration block of mono PCM at the scorer's sample rate.
///
/// Assembled once per inference tick on the detection thread: native-rate
/// audio is read from the session ring, downmixed, resampled and length-fit
/// before it lands here.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Wall-clock time the window was assembled.
    pub captured_at: SystemTime,
}

impl AudioWindow {
    pub fn new(samples: Vec<f32>, sample_rate: u32, captured_at: SystemTime) -> Self {
        Self {
            samples,
            sample_rate,
            captured_at,
        }
    }

    /// Duration in seconds based on sample count and rate.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Capture time as Unix seconds, the timestamp format events carry.
    pub fn unix_timestamp(&self) -> f64 {
        self.captured_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn duration_is_samples_over_rate() {
        let w = AudioWindow::new(vec![0.0; 16_000], 16_000, SystemTime::now());
        assert_abs_diff_eq!(w.duration_secs(), 1.0, epsilon = 1e-9);

        let w = AudioWindow::new(vec![0.0; 8_000], 16_000, SystemTime::now());
        assert_abs_diff_eq!(w.duration_secs(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn unix_timestamp_is_recent() {
        let w = AudioWindow::new(vec![], 16_000, SystemTime::now());
        assert!(w.is_empty());
        // Sanity bound: somewhere after 2020.
        assert!(w.unix_timestamp() > 1.577e9);
    }
}
