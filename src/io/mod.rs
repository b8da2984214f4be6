// Purpose - audio output devices behind a blocking-write interface

#[cfg(feature = "cpal")]
mod cpal_backend;
mod offline;

use std::time::Instant;

#[cfg(feature = "cpal")]
pub use cpal_backend::CpalBackend;
pub use offline::{OfflineBackend, OfflineHandle};

use crate::error::SinkError;

/// Parameters an output stream is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkConfig {
    pub sample_rate: u32,
    /// Frames per `write` call
    pub buffer_frames: usize,
}

/// "Frame `frame` of this sink's stream is audible at `time`."
/// Frames count from 0 at the moment the sink was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTimestamp {
    pub frame: u64,
    pub time: Instant,
}

/// An opened mono output stream.
///
/// Sinks are created and used on the render thread only, so they need not
/// be `Send` (device streams often are not). Releasing happens on drop.
pub trait AudioSink {
    fn config(&self) -> SinkConfig;

    /// Queue `buffer` for playback, blocking until the device accepted it.
    /// This is what paces the render loop to real time.
    fn write(&mut self, buffer: &[f32]) -> Result<(), SinkError>;

    /// Latest known playback position, if the device reports one.
    fn timestamp(&self) -> Option<PlaybackTimestamp>;

    /// Frames written but not yet audible right after opening.
    fn latency_frames(&self) -> usize {
        self.config().buffer_frames
    }

    /// True once after the output routing changed (device unplugged,
    /// default device switched, ...). The render loop then checks whether
    /// the stream must be reopened.
    fn take_routing_change(&self) -> bool;

    /// Stop playback; pending samples may be discarded.
    fn stop(&mut self);
}

/// Opens sinks on some output device and reports what that device prefers.
pub trait AudioBackend: Send {
    fn native_sample_rate(&self) -> Result<u32, SinkError>;

    /// Smallest buffer the device accepts at `sample_rate`, in frames.
    fn min_buffer_frames(&self, sample_rate: u32) -> Result<usize, SinkError>;

    fn open(&mut self, config: SinkConfig) -> Result<Box<dyn AudioSink>, SinkError>;
}
