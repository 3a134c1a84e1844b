//! WAV clip writing for detection debugging.

use std::path::Path;

use crate::error::Result;

/// Write mono f32 samples as a 16-bit PCM WAV file.
///
/// Used for threshold tuning: with `CLAPPER_CLIP_DIR` set, the detection
/// loop dumps the window behind each accepted detection so it can be
/// listened to later.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let write = || -> std::result::Result<(), hound::Error> {
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()
    };
    write().map_err(|e| anyhow::anyhow!("wav write {}: {e}", path.display()))?;
    Ok(())
}
