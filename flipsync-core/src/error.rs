use thiserror::Error;

use crate::audio::AudioSpec;

/// All errors produced by flipsync-core.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("device format mismatch: requested {requested}, obtained {obtained}")]
    FormatMismatch {
        requested: AudioSpec,
        obtained: AudioSpec,
    },

    #[error("failed to allocate {bytes} bytes for {what}")]
    Allocation { what: &'static str, bytes: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
