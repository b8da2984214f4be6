//! The playback engine.
//!
//! [`Engine`] is the only entry point callers need. Every control call is
//! non-blocking and "last write wins"; the render thread picks changes up
//! at the start of its next cycle. Listener registrations outlive
//! sessions, everything else (cursor, in-flight notes, open sink) lives
//! from `start` to `stop`.

pub mod clock;
pub(crate) mod control;
pub mod mixer;
mod render;
pub mod scheduler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub use control::LatestCell;

use self::control::ControlPlane;
use self::render::{RenderContext, Status};
use self::scheduler::SyncRequest;
use crate::error::{EngineError, SinkError};
use crate::io::AudioBackend;
use crate::notify::{Dispatch, ListenerHandle, Offset, OnsetListener, OnsetNotifier};
use crate::samples::SampleProvider;
use crate::sequencing::{NoteId, Playlist};

/// Fastest accepted tempo in quarter notes per minute. Keeps every note at
/// least one frame long at [`MIN_SAMPLE_RATE`].
pub const MAX_TEMPO: f64 = 2000.0;

/// Slowest sample rate the engine accepts
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EngineConfig {
    /// Fixed output rate; `None` follows the device's native rate
    pub sample_rate: Option<u32>,
    /// Frames rendered per cycle, raised to the device minimum
    pub buffer_frames: usize,
    /// Bound of the onset queue feeding the notifier
    pub event_queue_capacity: usize,
    /// Wake-up granularity of the notifier thread
    pub notifier_poll: Duration,
    /// How often the frame clock is re-anchored on the device position
    pub clock_resync_interval: Duration,
    pub initial_tempo: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            buffer_frames: 256,
            event_queue_capacity: 1024,
            notifier_poll: Duration::from_millis(1),
            clock_resync_interval: Duration::from_millis(500),
            initial_tempo: 120.0,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_buffer_frames(mut self, frames: usize) -> Self {
        self.buffer_frames = frames;
        self
    }

    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity;
        self
    }

    pub fn with_notifier_poll(mut self, poll: Duration) -> Self {
        self.notifier_poll = poll;
        self
    }

    pub fn with_clock_resync_interval(mut self, interval: Duration) -> Self {
        self.clock_resync_interval = interval;
        self
    }

    pub fn with_initial_tempo(mut self, tempo: f64) -> Self {
        self.initial_tempo = tempo;
        self
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.buffer_frames == 0 {
            return Err(EngineError::InvalidBufferSize);
        }
        if let Some(rate) = self.sample_rate.filter(|&r| r < MIN_SAMPLE_RATE) {
            return Err(EngineError::InvalidSampleRate {
                rate,
                min: MIN_SAMPLE_RATE,
            });
        }
        validate_tempo(self.initial_tempo)
    }
}

fn validate_tempo(tempo: f64) -> Result<(), EngineError> {
    if tempo.is_finite() && tempo > 0.0 && tempo <= MAX_TEMPO {
        Ok(())
    } else {
        Err(EngineError::InvalidTempo {
            tempo,
            max: MAX_TEMPO,
        })
    }
}

/// Where the engine is in its start/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

struct Session {
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// A metronome: one playlist, one output, any number of onset listeners.
///
/// Engines are independent of each other; nothing is process-global.
pub struct Engine {
    backend: Arc<Mutex<Box<dyn AudioBackend>>>,
    provider: Arc<dyn SampleProvider>,
    config: EngineConfig,
    control: Arc<ControlPlane>,
    notifier: OnsetNotifier,
    status: Arc<Status>,
    session: Mutex<Option<Session>>,
}

impl Engine {
    /// Create a stopped engine playing a four-beat bar (accent
    /// `NoteId(0)`, then `NoteId(1)`) until another playlist is set.
    pub fn new(
        backend: Box<dyn AudioBackend>,
        provider: Arc<dyn SampleProvider>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let playlist = Playlist::bar(4, NoteId(0), NoteId(1))?;
        let notifier = OnsetNotifier::spawn(config.event_queue_capacity, config.notifier_poll)?;

        Ok(Self {
            backend: Arc::new(Mutex::new(backend)),
            provider,
            control: Arc::new(ControlPlane::new(playlist, config.initial_tempo)),
            notifier,
            status: Arc::new(Status::default()),
            session: Mutex::new(None),
            config,
        })
    }

    /// Start playback from the first note. A running session is stopped
    /// first. Returns once the output is open, or with the error that
    /// prevented opening it.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = session.take() {
            self.shutdown(previous);
        }

        self.status.set_state(PlaybackState::Starting);
        self.control.clear_pending();
        let cancel = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let ctx = RenderContext {
            backend: self.backend.clone(),
            provider: self.provider.clone(),
            control: self.control.clone(),
            events: self.notifier.sender(),
            delays: self.notifier.delays(),
            status: self.status.clone(),
            cancel: cancel.clone(),
            config: self.config.clone(),
        };

        let spawned = thread::Builder::new()
            .name("clicktrack-render".into())
            .spawn(move || render::run(ctx, ready_tx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(source) => {
                self.status.set_state(PlaybackState::Stopped);
                return Err(EngineError::ThreadSpawn {
                    name: "render",
                    source,
                });
            }
        };

        let opened = ready_rx.recv().unwrap_or(Err(SinkError::Closed));
        match opened {
            Ok(rate) => {
                log::info!("playback started at {rate} Hz, tempo {}", self.tempo());
                *session = Some(Session { cancel, thread });
                Ok(())
            }
            Err(err) => {
                if thread.join().is_err() {
                    log::error!("render thread panicked while opening the output");
                }
                self.status.reset();
                self.status.set_state(PlaybackState::Stopped);
                Err(err.into())
            }
        }
    }

    /// Stop playback and wait for the render thread to finish its last
    /// write. Pending notifications are discarded.
    pub fn stop(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = session {
            self.shutdown(session);
        }
    }

    fn shutdown(&self, session: Session) {
        self.status.set_state(PlaybackState::Stopping);
        session.cancel.store(true, Ordering::Release);
        if session.thread.join().is_err() {
            log::error!("render thread panicked");
        }
        self.notifier.sender().discard_all();
        self.status.reset();
        self.status.set_state(PlaybackState::Stopped);
        log::info!("playback stopped after {} notes", self.note_count());
    }

    /// Replace the playlist; the render loop switches at its next cycle.
    pub fn set_playlist(&self, playlist: Playlist) {
        self.control.set_playlist(playlist);
    }

    /// Set the tempo in quarter notes per minute, `(0, MAX_TEMPO]`.
    pub fn set_tempo(&self, tempo: f64) -> Result<(), EngineError> {
        validate_tempo(tempo)?;
        self.control.set_tempo(tempo);
        Ok(())
    }

    /// Silence the output; scheduling and notifications continue.
    pub fn set_mute(&self, muted: bool) {
        self.control.set_muted(muted);
    }

    /// Register `listener` to hear about every onset `delay` after it is
    /// audible. Negative delays are realized by delaying the audio output.
    pub fn register_listener(
        &self,
        delay: Offset,
        dispatch: Dispatch,
        listener: impl OnsetListener + 'static,
    ) -> Result<ListenerHandle, EngineError> {
        self.notifier.register(delay, dispatch, Arc::new(listener))
    }

    pub fn unregister_listener(&self, handle: ListenerHandle) {
        self.notifier.unregister(handle);
    }

    /// Shift playback so the playlist's first note lands on
    /// `reference + n * beat_duration` for some integer `n`.
    pub fn synchronize(&self, reference: Instant, beat_duration: Duration) -> Result<(), EngineError> {
        if beat_duration.is_zero() {
            return Err(EngineError::InvalidBeatDuration);
        }
        self.control.sync.set(SyncRequest {
            reference,
            beat_duration,
        });
        Ok(())
    }

    /// Make the note at `index` (modulo the playlist length) the next one.
    pub fn set_next_note_index(&self, index: usize) {
        self.control.next_index.set(index);
    }

    /// Restart from the first note at the current position, dropping
    /// in-flight notes and pending notifications.
    pub fn restart(&self) {
        self.control.request_restart();
    }

    pub fn state(&self) -> PlaybackState {
        self.status.state()
    }

    pub fn tempo(&self) -> f64 {
        self.control.tempo()
    }

    pub fn is_muted(&self) -> bool {
        self.control.is_muted()
    }

    pub fn playlist(&self) -> Arc<Playlist> {
        self.control.playlist()
    }

    /// Sample rate of the open output, `None` while stopped.
    pub fn sample_rate(&self) -> Option<u32> {
        self.status.sample_rate()
    }

    /// Notes scheduled in the current session.
    pub fn note_count(&self) -> u64 {
        self.status.note_count()
    }

    /// Onsets dropped because the notifier fell behind.
    pub fn dropped_events(&self) -> u64 {
        self.notifier.dropped_events()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo_bounds() {
        assert!(validate_tempo(MAX_TEMPO).is_ok());
        assert!(validate_tempo(0.5).is_ok());
        for bad in [0.0, -60.0, MAX_TEMPO + 0.1, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                validate_tempo(bad),
                Err(EngineError::InvalidTempo { .. })
            ));
        }
    }

    #[test]
    fn config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(matches!(
            EngineConfig::default().with_buffer_frames(0).validate(),
            Err(EngineError::InvalidBufferSize)
        ));
        assert!(matches!(
            EngineConfig::default().with_sample_rate(4_000).validate(),
            Err(EngineError::InvalidSampleRate { rate: 4_000, .. })
        ));
        assert!(EngineConfig::default()
            .with_initial_tempo(0.0)
            .validate()
            .is_err());
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            PlaybackState::Stopped,
            PlaybackState::Starting,
            PlaybackState::Running,
            PlaybackState::Stopping,
        ] {
            assert_eq!(PlaybackState::from_u8(state as u8), state);
        }
    }
}
