//! # clapper-core
//!
//! Reusable clap-detection engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! Microphone ─┐
//! RTSP/ffmpeg ├─► AudioSession → SessionAudio ring → detector thread
//! VBAN/UDP   ─┘                                          │
//!                                         downmix · resample · window
//!                                                        │
//!                                              AudioScorer::score
//!                                                        │
//!                                     broadcast claps/labels · webhook POST
//! ```
//!
//! Each source kind feeds the same native-rate ring; the detection thread
//! assembles overlapping windows from it and scores them. Rate conversion
//! happens once per window, off the capture path.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod events;
pub mod notify;
pub mod protocol;
pub mod scorer;
pub mod session;

// Convenience re-exports for downstream crates
pub use engine::{ClapEngine, DetectionConfig};
pub use error::ClapperError;
pub use events::{ClapEvent, EngineStatus, EngineStatusEvent, LabelsEvent};
pub use protocol::registry::{RemoteSource, SourceRegistry};
pub use scorer::{transient::TransientScorer, AudioScorer, LabelScore, ScorerHandle};
pub use session::AudioSource;
