use std::collections::BTreeSet;

use super::note::{Note, NoteId};
use crate::error::EngineError;

/// Ordered, non-empty sequence of notes played cyclically.
///
/// A `Playlist` can only be built through [`Playlist::new`], so holding one
/// means the non-empty invariant holds. The engine shares it behind an `Arc`
/// and replaces it wholesale; it is never edited in place.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Playlist {
    notes: Vec<Note>,
}

impl Playlist {
    pub fn new(notes: Vec<Note>) -> Result<Self, EngineError> {
        if notes.is_empty() {
            return Err(EngineError::EmptyPlaylist);
        }
        if let Some(bad) = notes.iter().find(|n| !(0.0..=1.0).contains(&n.volume)) {
            return Err(EngineError::InvalidVolume(bad.volume));
        }
        Ok(Self { notes })
    }

    /// `count` full-volume quarter notes, the first one accented with `accent`.
    pub fn bar(count: usize, accent: NoteId, beat: NoteId) -> Result<Self, EngineError> {
        let notes = (0..count)
            .map(|i| Note::quarter(if i == 0 { accent } else { beat }))
            .collect();
        Self::new(notes)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Note> {
        self.notes.get(index)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter()
    }

    /// Distinct sounds used, for preloading the sample bank.
    pub fn note_ids(&self) -> BTreeSet<NoteId> {
        self.notes.iter().map(|n| n.id).collect()
    }

    /// Total loop length in quarter notes.
    pub fn loop_quarters(&self) -> f64 {
        self.notes.iter().map(|n| n.duration.as_duration().quarters()).sum()
    }

    /// Total loop length in frames, summing per-note rounded lengths the
    /// same way the scheduler advances.
    pub fn loop_frames(&self, tempo: f64, sample_rate: u32) -> i64 {
        self.frames_before(self.notes.len(), tempo, sample_rate)
    }

    /// Frames from the start of the loop to the start of note `index`.
    pub fn frames_before(&self, index: usize, tempo: f64, sample_rate: u32) -> i64 {
        self.notes
            .iter()
            .take(index)
            .map(|n| n.duration.frames(tempo, sample_rate).max(0))
            .sum()
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Playlist {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        struct Raw {
            notes: Vec<Note>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Playlist::new(raw.notes).map_err(serde::de::Error::custom)
    }
}
