//! Microphone capture through cpal.
//!
//! The input callback runs on an OS audio thread at realtime priority, so it
//! must not allocate, lock, or touch I/O. Samples are converted to mono f32
//! and pushed straight into the lock-free SPSC capture ring; the device
//! session's mover thread drains the other end into the windowing buffer.
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS), so an [`AudioCapture`] must be created and dropped on one thread.
//! `DeviceSession` does both from its worker thread.

pub mod device;
pub mod resample;
pub mod wav;

#[cfg(feature = "audio-device")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    Device, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};

use crate::{
    buffering::CaptureProducer,
    error::{ClapperError, Result},
};
#[cfg(feature = "audio-device")]
use crate::buffering::Producer;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
#[cfg(feature = "audio-device")]
use tracing::{error, info, warn};

/// Mix interleaved frames down to mono by averaging channels.
///
/// Mono input is returned unchanged; a trailing partial frame is dropped.
/// Network and pipe sources go through this on the detection thread; the
/// capture callback does the same mix into a reused scratch buffer.
pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Handle to an active audio capture stream.
///
/// **Not `Send`** — `cpal::Stream` is bound to its creation thread on Windows/macOS.
/// Create and drop this type on the same OS thread.
pub struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    #[cfg(feature = "audio-device")]
    _stream: Stream,
    /// Shared flag — set to `false` to signal the callback to no-op.
    running: Arc<AtomicBool>,
    /// Actual capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

impl AudioCapture {
    /// Open an input device by enumeration index, otherwise fall back to the
    /// default input device and then the first available device.
    ///
    /// Pushes mono f32 frames at the device's native rate into `producer`.
    ///
    /// # Errors
    /// Returns `ClapperError::NoInputDevice` when no microphone is available,
    /// or `ClapperError::AudioDevice` if cpal fails to build the stream.
    #[cfg(feature = "audio-device")]
    pub fn open(
        producer: CaptureProducer,
        running: Arc<AtomicBool>,
        device_index: Option<usize>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(index) = device_index {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.nth(index);
                    if selected_device.is_none() {
                        warn!(index, "requested input device index not found, falling back");
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving index: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| ClapperError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(ClapperError::NoInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| ClapperError::AudioDevice(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();

        info!(sample_rate, channels, "audio config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                build_capture_stream::<f32>(&device, &config, producer, Arc::clone(&running), |s| s)
            }
            SampleFormat::I16 => build_capture_stream::<i16>(
                &device,
                &config,
                producer,
                Arc::clone(&running),
                |s| f32::from(s) / 32768.0,
            ),
            SampleFormat::U8 => build_capture_stream::<u8>(
                &device,
                &config,
                producer,
                Arc::clone(&running),
                |s| (f32::from(s) - 128.0) / 128.0,
            ),
            fmt => {
                return Err(ClapperError::AudioDevice(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| ClapperError::AudioDevice(e.to_string()))?;

        stream
            .play()
            .map_err(|e| ClapperError::AudioDevice(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Stop: signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Build an input stream for one concrete sample type.
///
/// Every sample goes through `to_f32`, interleaved channels are averaged to
/// mono, and the result lands in the capture ring. The scratch buffer is
/// reused across callbacks, so its allocation settles after the first few
/// invocations and the hot path stays free of locks and I/O.
#[cfg(feature = "audio-device")]
fn build_capture_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: CaptureProducer,
    running: Arc<AtomicBool>,
    to_f32: fn(T) -> f32,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + Send + 'static,
{
    let channels = usize::from(config.channels).max(1);
    let mut mono: Vec<f32> = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _info| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            mono.clear();
            mono.reserve(data.len() / channels);
            if channels == 1 {
                mono.extend(data.iter().copied().map(to_f32));
            } else {
                for frame in data.chunks_exact(channels) {
                    let sum: f32 = frame.iter().copied().map(to_f32).sum();
                    mono.push(sum / channels as f32);
                }
            }
            let written = producer.push_slice(&mono);
            if written < mono.len() {
                warn!("capture ring full: dropped {} frames", mono.len() - written);
            }
        },
        |err| error!("audio stream error: {err}"),
        None,
    )
}

/// Stub when the `audio-device` feature is disabled.
#[cfg(not(feature = "audio-device"))]
impl AudioCapture {
    pub fn open(
        _producer: CaptureProducer,
        _running: Arc<AtomicBool>,
        _device_index: Option<usize>,
    ) -> Result<Self> {
        Err(ClapperError::AudioDevice(
            "compiled without audio-device feature".into(),
        ))
    }
}
