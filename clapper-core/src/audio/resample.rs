//! Sample-rate conversion for classification windows.
//!
//! ## Design
//!
//! Sources deliver audio at whatever rate the device or sender uses; the
//! scorer wants a fixed rate. Conversion happens once per inference tick on
//! the whole window read from the session ring, never per network packet, so
//! there is no streaming state to carry between calls and identical input
//! always produces identical output.
//!
//! Exact integer ratios (48 kHz → 16 kHz) decimate by stride. Everything
//! else goes through a rubato `FastFixedIn` sized to the window.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{ClapperError, Result};

/// Convert `input` from `source_rate` to `target_rate`.
///
/// Output length is `round(input.len() × target_rate / source_rate)`.
/// Equal rates return a copy.
pub fn resample(input: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    if source_rate == 0 || target_rate == 0 {
        return Err(ClapperError::Pipeline(format!(
            "invalid resample rates {source_rate} -> {target_rate}"
        )));
    }
    if source_rate == target_rate {
        return Ok(input.to_vec());
    }
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let expected =
        ((input.len() as f64 * target_rate as f64) / source_rate as f64).round() as usize;

    // The common case is an exact downsampling ratio; plain decimation is
    // cheap and carries no filter state.
    if source_rate % target_rate == 0 {
        let step = (source_rate / target_rate) as usize;
        let mut out: Vec<f32> = input.iter().step_by(step).copied().collect();
        out.resize(expected, 0.0);
        return Ok(out);
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0, // fixed ratio — no dynamic adjustment
        PolynomialDegree::Cubic,
        input.len(),
        1, // mono
    )
    .map_err(|e| ClapperError::Pipeline(format!("resampler init: {e}")))?;

    let mut blocks = resampler
        .process(&[input], None)
        .map_err(|e| ClapperError::Pipeline(format!("resampler process: {e}")))?;
    let mut out = blocks.pop().unwrap_or_default();

    // Flush the interpolator tail so the window keeps its duration.
    if out.len() < expected {
        if let Ok(mut tail) = resampler.process_partial(None::<&[&[f32]]>, None) {
            if let Some(rest) = tail.pop() {
                out.extend_from_slice(&rest);
            }
        }
    }
    out.resize(expected, 0.0);
    Ok(out)
}

/// Pad with trailing zeros or truncate so `samples` is exactly `len` long.
///
/// Scorers take a fixed input size; rate conversion rounds, so a window can
/// come out a few samples off.
pub fn fit_length(mut samples: Vec<f32>, len: usize) -> Vec<f32> {
    samples.resize(len, 0.0);
    samples
}
