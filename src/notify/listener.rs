use std::fmt;
use std::ops::Add;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::sequencing::Note;

/// A note that started (or will start) playing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteOnset {
    pub note: Note,
    /// When the first sample of the note is audible
    pub start_time: Instant,
    /// Position of the note since the session started
    pub note_count: u64,
}

/// Observer of note onsets (visual metronome, vibration, ...).
///
/// Called from the notifier thread or from the executor chosen at
/// registration. Must not block for long; offload heavy work.
pub trait OnsetListener: Send + Sync {
    fn on_note_started(&self, onset: &NoteOnset);
}

impl<F> OnsetListener for F
where
    F: Fn(&NoteOnset) + Send + Sync,
{
    fn on_note_started(&self, onset: &NoteOnset) {
        self(onset)
    }
}

/// Work handed to a caller-supplied executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Where a listener's callback runs.
#[derive(Clone, Default)]
pub enum Dispatch {
    /// On the notifier thread itself. Lowest latency; the callback must be quick.
    #[default]
    Inline,
    /// On a worker thread owned by the registration.
    Dedicated,
    /// Pushed onto a queue the caller drains (e.g. a UI thread).
    Queue(Sender<Job>),
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Inline => f.write_str("Inline"),
            Dispatch::Dedicated => f.write_str("Dedicated"),
            Dispatch::Queue(_) => f.write_str("Queue"),
        }
    }
}

/// Returned by registration; pass back to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(pub(crate) u64);

/// Signed time offset. Negative values request early notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset {
    nanos: i64,
}

impl Offset {
    pub const ZERO: Offset = Offset { nanos: 0 };

    pub const fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    pub const fn from_millis(millis: i64) -> Self {
        Self {
            nanos: millis * 1_000_000,
        }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self {
            nanos: (secs * 1e9).round() as i64,
        }
    }

    pub const fn as_nanos(&self) -> i64 {
        self.nanos
    }

    pub const fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    /// Magnitude as a `Duration`.
    pub fn abs(&self) -> Duration {
        Duration::from_nanos(self.nanos.unsigned_abs())
    }
}

impl From<Duration> for Offset {
    fn from(d: Duration) -> Self {
        Self {
            nanos: d.as_nanos().min(i64::MAX as u128) as i64,
        }
    }
}

impl Add<Offset> for Instant {
    type Output = Instant;

    fn add(self, offset: Offset) -> Instant {
        if offset.is_negative() {
            self.checked_sub(offset.abs()).unwrap_or(self)
        } else {
            self + offset.abs()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_shift_instants_both_ways() {
        let base = Instant::now() + Duration::from_secs(1);
        assert_eq!(base + Offset::from_millis(20), base + Duration::from_millis(20));
        assert_eq!(base + Offset::from_millis(-20), base - Duration::from_millis(20));
        assert_eq!(base + Offset::ZERO, base);
    }

    #[test]
    fn offset_conversions() {
        assert_eq!(Offset::from_secs_f64(-0.5).as_nanos(), -500_000_000);
        assert_eq!(Offset::from(Duration::from_millis(3)), Offset::from_millis(3));
        assert!(Offset::from_millis(-1) < Offset::ZERO);
    }
}
