use thiserror::Error;

/// All errors produced by clapper-core.
#[derive(Debug, Error)]
pub enum ClapperError {
    #[error("malformed packet: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("no input device found")]
    NoInputDevice,

    #[error("audio pipeline error: {0}")]
    Pipeline(String),

    #[error("scorer error: {0}")]
    Scorer(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClapperError>;
