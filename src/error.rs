//! Error taxonomy.
//!
//! Configuration errors are rejected at the [`Engine`](crate::engine::Engine)
//! boundary and never reach the render thread. Device errors surface as
//! [`SinkError`] and are recovered inside the render loop by reopening the
//! sink.

use thiserror::Error;

/// Errors reported by the public engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("playlist must contain at least one note")]
    EmptyPlaylist,

    #[error("tempo must be in (0, {max}] quarter notes per minute, got {tempo}")]
    InvalidTempo { tempo: f64, max: f64 },

    #[error("note volume must be in [0, 1], got {0}")]
    InvalidVolume(f32),

    #[error("beat duration must be positive")]
    InvalidBeatDuration,

    #[error("buffer size must be at least one frame")]
    InvalidBufferSize,

    #[error("sample rate must be at least {min} Hz, got {rate}")]
    InvalidSampleRate { rate: u32, min: u32 },

    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Errors raised by an audio backend or an opened sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no output device available")]
    NoDevice,

    #[error("unsupported output configuration: {0}")]
    UnsupportedConfig(String),

    #[error("failed to open output stream: {0}")]
    Open(String),

    #[error("output stream error: {0}")]
    Stream(String),

    #[error("output stream stopped consuming samples")]
    Stalled,

    #[error("output device is no longer available")]
    DeviceLost,

    #[error("sink is closed")]
    Closed,
}
