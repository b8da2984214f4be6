//! A single playable click.

use super::duration::Duration;
use crate::error::EngineError;

/// Identifies the instrument/sound a note plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NoteId(pub u8);

/// Symbolic note length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NoteDuration {
    #[default]
    Quarter,
    QuarterTriplet,
    QuarterQuintuplet,
    Eighth,
    EighthTriplet,
    EighthQuintuplet,
    Sixteenth,
    SixteenthTriplet,
    SixteenthQuintuplet,
}

impl NoteDuration {
    pub const fn as_duration(self) -> Duration {
        match self {
            NoteDuration::Quarter => Duration::QUARTER,
            NoteDuration::QuarterTriplet => Duration::QUARTER.triplet(),
            NoteDuration::QuarterQuintuplet => Duration::QUARTER.quintuplet(),
            NoteDuration::Eighth => Duration::EIGHTH,
            NoteDuration::EighthTriplet => Duration::EIGHTH.triplet(),
            NoteDuration::EighthQuintuplet => Duration::EIGHTH.quintuplet(),
            NoteDuration::Sixteenth => Duration::SIXTEENTH,
            NoteDuration::SixteenthTriplet => Duration::SIXTEENTH.triplet(),
            NoteDuration::SixteenthQuintuplet => Duration::SIXTEENTH.quintuplet(),
        }
    }

    /// Length in frames at `tempo` quarter notes per minute.
    pub fn frames(self, tempo: f64, sample_rate: u32) -> i64 {
        self.as_duration().frames(tempo, sample_rate)
    }
}

/// One click in a playlist: which sound, how loud, how long until the next one.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Note {
    pub id: NoteId,
    /// Linear gain in `[0, 1]`
    pub volume: f32,
    pub duration: NoteDuration,
}

impl Note {
    /// Create a note, rejecting volumes outside `[0, 1]` (and NaN).
    pub fn new(id: NoteId, volume: f32, duration: NoteDuration) -> Result<Self, EngineError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(EngineError::InvalidVolume(volume));
        }
        Ok(Self {
            id,
            volume,
            duration,
        })
    }

    /// Full-volume quarter note.
    pub fn quarter(id: NoteId) -> Self {
        Self {
            id,
            volume: 1.0,
            duration: NoteDuration::Quarter,
        }
    }

    pub fn with_volume(mut self, volume: f32) -> Result<Self, EngineError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(EngineError::InvalidVolume(volume));
        }
        self.volume = volume;
        Ok(self)
    }

    pub fn with_duration(mut self, duration: NoteDuration) -> Self {
        self.duration = duration;
        self
    }
}
