//! Audio sessions: one uniform lifecycle over device, RTSP and VBAN sources.
//!
//! A session owns whatever produces audio (capture stream, ffmpeg child, UDP
//! socket) plus the thread that feeds the shared [`SessionAudio`] ring. The
//! detection loop only ever sees `SessionAudio`, so source differences stop
//! at this module's boundary.

pub mod device;
pub mod rtsp;
pub mod vban;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::buffering::CircularBuffer;
use crate::error::{ClapperError, Result};
use crate::protocol::registry::SourceRegistry;

/// Where a session gets its audio. Decided once, at session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AudioSource {
    /// Local input device by enumeration index; `None` means system default.
    Device { index: Option<usize> },
    /// RTSP URL pulled through the external media pipeline.
    Rtsp { url: String },
    /// VBAN sender filtered by IP; `port` is the local UDP port to bind.
    Vban { ip: IpAddr, port: u16 },
}

impl AudioSource {
    /// Map the loose string descriptors hosts pass around onto typed sources.
    ///
    /// Accepted forms: `default`, `device:<index>`, `rtsp://…`,
    /// `vban://<ip>[:port]`.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ClapperError::Config("empty source descriptor".into()));
        }
        if trimmed.eq_ignore_ascii_case("default") || trimmed.eq_ignore_ascii_case("microphone") {
            return Ok(Self::Device { index: None });
        }
        if let Some(index) = trimmed.strip_prefix("device:") {
            let index = index
                .parse::<usize>()
                .map_err(|_| ClapperError::Config(format!("bad device index in {trimmed:?}")))?;
            return Ok(Self::Device { index: Some(index) });
        }
        if trimmed.starts_with("rtsp://") {
            return Ok(Self::Rtsp {
                url: trimmed.to_string(),
            });
        }
        if let Some(rest) = trimmed.strip_prefix("vban://") {
            if let Ok(ip) = rest.parse::<IpAddr>() {
                return Ok(Self::Vban {
                    ip,
                    port: crate::protocol::VBAN_PORT,
                });
            }
            let (ip_text, port_text) = rest
                .rsplit_once(':')
                .ok_or_else(|| ClapperError::Config(format!("bad address in {trimmed:?}")))?;
            let ip = ip_text
                .parse::<IpAddr>()
                .map_err(|_| ClapperError::Config(format!("bad ip in {trimmed:?}")))?;
            let port = port_text
                .parse::<u16>()
                .map_err(|_| ClapperError::Config(format!("bad port in {trimmed:?}")))?;
            return Ok(Self::Vban { ip, port });
        }
        Err(ClapperError::Config(format!(
            "unrecognised source {trimmed:?}"
        )))
    }

    /// Stable identifier used in events and logs.
    pub fn id(&self) -> String {
        match self {
            Self::Device { index: None } => "microphone".to_string(),
            Self::Device { index: Some(i) } => format!("microphone-{i}"),
            Self::Rtsp { url } => format!("rtsp-{url}"),
            Self::Vban { ip, .. } => format!("vban-{ip}"),
        }
    }
}

/// Native rate and interleave of the audio a session buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

struct BufferedAudio {
    format: AudioFormat,
    ring: CircularBuffer,
}

/// Buffered audio shared between a session's producer thread and the
/// detection loop.
///
/// The ring is created when the producer learns the native format — at
/// device open, at ffmpeg spawn, or from the first accepted VBAN packet —
/// and holds one scoring window at that rate.
pub struct SessionAudio {
    window_secs: f64,
    state: Mutex<Option<BufferedAudio>>,
}

impl SessionAudio {
    pub fn new(window_secs: f64) -> Arc<Self> {
        Arc::new(Self {
            window_secs,
            state: Mutex::new(None),
        })
    }

    /// Producer side: fix the native format and size the ring for it.
    /// Re-configuring with the same format keeps buffered audio; a different
    /// format replaces the ring.
    pub fn configure(&self, format: AudioFormat) {
        let capacity = ((self.window_secs * format.sample_rate as f64).ceil() as usize).max(1);
        let mut state = self.state.lock();
        match state.as_ref() {
            Some(existing) if existing.format == format => {}
            _ => {
                *state = Some(BufferedAudio {
                    format,
                    ring: CircularBuffer::new(capacity, format.channels as usize),
                });
            }
        }
    }

    /// Producer side: append interleaved samples. Dropped with a warning
    /// before `configure` has run.
    pub fn write(&self, samples: &[f32]) {
        let mut state = self.state.lock();
        match state.as_mut() {
            Some(buffered) => buffered.ring.write(samples),
            None => warn!(
                dropped = samples.len(),
                "samples written before session format was set"
            ),
        }
    }

    /// Consumer side: the most recent `duration` of audio at the native
    /// rate, zero-padded while the ring warms up. `None` until the producer
    /// has configured a format.
    pub fn read_window(&self, duration: Duration) -> Option<NativeWindow> {
        let state = self.state.lock();
        let buffered = state.as_ref()?;
        let frames = ((duration.as_secs_f64() * buffered.format.sample_rate as f64).round()
            as usize)
            .max(1);
        Some(NativeWindow {
            format: buffered.format,
            samples: buffered.ring.read(frames),
        })
    }

    /// Current native format, once known.
    pub fn format(&self) -> Option<AudioFormat> {
        self.state.lock().as_ref().map(|b| b.format)
    }

    /// Ring fill fraction; 0.0 while unconfigured.
    pub fn level(&self) -> f32 {
        self.state
            .lock()
            .as_ref()
            .map(|b| b.ring.level())
            .unwrap_or(0.0)
    }

    /// Drop buffered audio, keeping the format.
    pub fn clear(&self) {
        if let Some(buffered) = self.state.lock().as_mut() {
            buffered.ring.clear();
        }
    }
}

/// A window read at the session's native rate, still interleaved.
#[derive(Debug, Clone)]
pub struct NativeWindow {
    pub format: AudioFormat,
    pub samples: Vec<f32>,
}

/// Uniform lifecycle over the three source kinds.
///
/// `start` blocks until the underlying resource is confirmed open and may be
/// called once per session. `stop` is safe in any state, including after a
/// failed start or a second time, and joins the producer thread before
/// returning.
pub trait AudioSession: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    /// Shared ring the producer fills.
    fn audio(&self) -> Arc<SessionAudio>;
    /// Stable identifier for events and logs.
    fn source_id(&self) -> &str;
}

/// Construct the session variant for `source`.
///
/// `window_secs` sizes the session ring; `registry` collects VBAN discovery
/// regardless of which variant is active.
pub fn build(
    source: &AudioSource,
    window_secs: f64,
    registry: Arc<SourceRegistry>,
) -> Box<dyn AudioSession> {
    match source {
        AudioSource::Device { index } => {
            Box::new(device::DeviceSession::new(*index, window_secs))
        }
        AudioSource::Rtsp { url } => Box::new(rtsp::RtspSession::new(url.clone(), window_secs)),
        AudioSource::Vban { ip, port } => Box::new(vban::VbanSession::new(
            vban::VbanConfig {
                bind_port: *port,
                target: Some(*ip),
            },
            window_secs,
            registry,
        )),
    }
}

/// Attempts made to acquire a session resource before giving up.
pub(crate) const ACQUIRE_ATTEMPTS: u32 = 3;
/// Base backoff between attempts; grows linearly.
pub(crate) const ACQUIRE_BACKOFF: Duration = Duration::from_millis(200);

/// Run `attempt` up to [`ACQUIRE_ATTEMPTS`] times with linear backoff,
/// returning the last error if every attempt fails.
pub(crate) fn acquire_with_retry<T>(
    what: &str,
    mut attempt: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut last_err = None;
    for n in 1..=ACQUIRE_ATTEMPTS {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt = n, error = %e, "{what} failed");
                last_err = Some(e);
                if n < ACQUIRE_ATTEMPTS {
                    std::thread::sleep(ACQUIRE_BACKOFF * n);
                }
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| ClapperError::Config(format!("{what}: no attempts were made"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn parse_maps_the_documented_forms() {
        assert_eq!(
            AudioSource::parse("default").unwrap(),
            AudioSource::Device { index: None }
        );
        assert_eq!(
            AudioSource::parse("device:2").unwrap(),
            AudioSource::Device { index: Some(2) }
        );
        assert_eq!(
            AudioSource::parse("rtsp://cam.local/stream1").unwrap(),
            AudioSource::Rtsp {
                url: "rtsp://cam.local/stream1".to_string()
            }
        );
        assert_eq!(
            AudioSource::parse("vban://192.168.1.50").unwrap(),
            AudioSource::Vban {
                ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)),
                port: crate::protocol::VBAN_PORT,
            }
        );
        assert_eq!(
            AudioSource::parse("vban://192.168.1.50:7000").unwrap(),
            AudioSource::Vban {
                ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50)),
                port: 7000,
            }
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(AudioSource::parse("").is_err());
        assert!(AudioSource::parse("   ").is_err());
        assert!(AudioSource::parse("device:abc").is_err());
        assert!(AudioSource::parse("vban://not-an-ip").is_err());
        assert!(AudioSource::parse("vban://192.168.1.50:notaport").is_err());
        assert!(AudioSource::parse("http://example.com").is_err());
    }

    #[test]
    fn source_ids_are_stable() {
        assert_eq!(AudioSource::Device { index: None }.id(), "microphone");
        assert_eq!(AudioSource::Device { index: Some(3) }.id(), "microphone-3");
        assert_eq!(
            AudioSource::Rtsp {
                url: "rtsp://cam/1".to_string()
            }
            .id(),
            "rtsp-rtsp://cam/1"
        );
        assert_eq!(
            AudioSource::Vban {
                ip: "10.0.0.7".parse().unwrap(),
                port: 6980
            }
            .id(),
            "vban-10.0.0.7"
        );
    }

    #[test]
    fn source_serializes_tagged() {
        let json = serde_json::to_value(AudioSource::Vban {
            ip: "10.0.0.7".parse().unwrap(),
            port: 6980,
        })
        .unwrap();
        assert_eq!(json["kind"], "vban");
        assert_eq!(json["ip"], "10.0.0.7");
        assert_eq!(json["port"], 6980);

        let back: AudioSource =
            serde_json::from_str(r#"{"kind":"device","index":null}"#).unwrap();
        assert_eq!(back, AudioSource::Device { index: None });
    }

    #[test]
    fn session_audio_sizes_ring_from_format() {
        let audio = SessionAudio::new(1.0);
        assert!(audio.format().is_none());
        assert!(audio.read_window(Duration::from_secs(1)).is_none());

        audio.configure(AudioFormat {
            sample_rate: 16_000,
            channels: 1,
        });
        audio.write(&vec![0.5; 8_000]);
        assert!((audio.level() - 0.5).abs() < 1e-6);

        let window = audio.read_window(Duration::from_secs(1)).unwrap();
        assert_eq!(window.samples.len(), 16_000);
        assert_eq!(window.format.sample_rate, 16_000);
        // Newest audio sits at the right edge; the warm-up gap is zeros.
        assert_eq!(window.samples[0], 0.0);
        assert_eq!(window.samples[15_999], 0.5);
    }

    #[test]
    fn writes_before_configure_are_dropped() {
        let audio = SessionAudio::new(1.0);
        audio.write(&[0.1, 0.2, 0.3]);
        assert!(audio.format().is_none());
        assert_eq!(audio.level(), 0.0);
    }

    #[test]
    fn reconfigure_same_format_keeps_audio() {
        let format = AudioFormat {
            sample_rate: 8_000,
            channels: 1,
        };
        let audio = SessionAudio::new(1.0);
        audio.configure(format);
        audio.write(&vec![0.5; 4_000]);
        audio.configure(format);
        assert!(audio.level() > 0.0);

        // A different format replaces the ring.
        audio.configure(AudioFormat {
            sample_rate: 48_000,
            channels: 2,
        });
        assert_eq!(audio.level(), 0.0);
        assert_eq!(audio.format().unwrap().channels, 2);
    }

    #[test]
    fn retry_returns_first_success() {
        let mut attempts = 0u32;
        let result = acquire_with_retry("test resource", || {
            attempts += 1;
            if attempts < 3 {
                Err(ClapperError::Config("not yet".into()))
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn retry_surfaces_last_error() {
        let mut attempts = 0u32;
        let result: Result<()> = acquire_with_retry("test resource", || {
            attempts += 1;
            Err(ClapperError::Config(format!("failure {attempts}")))
        });
        match result {
            Err(ClapperError::Config(msg)) => assert_eq!(msg, "failure 3"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(attempts, ACQUIRE_ATTEMPTS);
    }
}
