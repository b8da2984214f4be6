//! Note scheduling: turns a playlist, a tempo and a cursor into
//! frame-stamped note starts.
//!
//! All positions are in frames of the render stream. The scheduler never
//! looks at wall-clock time except through [`FrameClock`] during a resync.

use std::time::{Duration, Instant};

use super::clock::FrameClock;
use crate::sequencing::{Note, Playlist};

/// Position of the next note to schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Index into the playlist of the next note
    pub index: usize,
    /// Frame at which that note starts
    pub frame: i64,
    /// Notes scheduled since playback started
    pub note_count: u64,
}

impl Cursor {
    /// Where a fresh session begins.
    pub const START: Cursor = Cursor {
        index: 0,
        frame: 1,
        note_count: 0,
    };

    /// Index 0 at `frame`, counter reset.
    pub fn restart_at(frame: i64) -> Self {
        Self {
            index: 0,
            frame,
            note_count: 0,
        }
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::START
    }
}

/// A note that starts at `frame`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteStart {
    pub note: Note,
    pub frame: i64,
    pub note_count: u64,
}

/// One-shot request to align the playlist's first beat with
/// `reference + n * beat_duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncRequest {
    pub reference: Instant,
    pub beat_duration: Duration,
}

/// Stateless apart from the sample rate it converts durations at.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    sample_rate: u32,
}

impl Scheduler {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    fn note_frames(&self, note: &Note, tempo: f64) -> i64 {
        note.duration.frames(tempo, self.sample_rate).max(0)
    }

    /// Zero-length notes are fine as long as the whole cycle is not.
    fn assert_cycle_advances(&self, playlist: &Playlist, tempo: f64) {
        assert!(
            playlist.loop_frames(tempo, self.sample_rate) > 0,
            "playlist cycle has zero length at tempo {tempo}"
        );
    }

    /// Emit every note starting before `rendered + frames` into `out`,
    /// advancing `cursor` past them.
    ///
    /// # Panics
    /// If a whole playlist cycle adds up to zero frames. The engine rejects
    /// tempos for which that can happen, so reaching it is a bug.
    pub fn advance(
        &self,
        cursor: &mut Cursor,
        playlist: &Playlist,
        tempo: f64,
        rendered: i64,
        frames: usize,
        out: &mut Vec<NoteStart>,
    ) {
        let horizon = rendered + frames as i64;

        while cursor.frame < horizon {
            let note = playlist.notes()[cursor.index];
            out.push(NoteStart {
                note,
                frame: cursor.frame,
                note_count: cursor.note_count,
            });

            let length = self.note_frames(&note, tempo);
            if length == 0 {
                self.assert_cycle_advances(playlist, tempo);
            }

            cursor.frame += length;
            cursor.index = (cursor.index + 1) % playlist.len();
            cursor.note_count += 1;
        }
    }

    /// Move `cursor` so the playlist's first note falls on the grid
    /// `reference + n * beat`, shifting by the smallest possible amount.
    ///
    /// If the aligned position is already in the past (before `rendered`),
    /// the cursor walks forward to the note that should be sounding now and
    /// that note is returned, stamped at `rendered`, so it is not lost.
    #[allow(clippy::too_many_arguments)]
    pub fn resync(
        &self,
        request: &SyncRequest,
        playlist: &Playlist,
        tempo: f64,
        cursor: &mut Cursor,
        clock: &FrameClock,
        output_delay: i64,
        rendered: i64,
    ) -> Option<NoteStart> {
        let beat = clock.duration_to_frames(request.beat_duration);
        if beat <= 0 {
            log::warn!(
                "ignoring sync request with beat duration {:?} (under one frame)",
                request.beat_duration
            );
            return None;
        }

        let reference_frame = clock.time_to_frame(request.reference) - output_delay;
        let note_frame =
            reference_frame + playlist.frames_before(cursor.index, tempo, self.sample_rate);

        let target = cursor.frame;
        let base = note_frame + (target - note_frame).div_euclid(beat) * beat;
        let mut corrected = base;
        for candidate in [base - beat, base + beat] {
            if (candidate - target).abs() < (corrected - target).abs() {
                corrected = candidate;
            }
        }
        log::debug!(
            "resync: note {} moves from frame {} to {}",
            cursor.index,
            target,
            corrected
        );
        cursor.frame = corrected;

        if corrected >= rendered {
            return None;
        }

        // Late: catch up to the note that should be sounding at `rendered`
        loop {
            let length = self.note_frames(&playlist.notes()[cursor.index], tempo);
            if cursor.frame + length > rendered {
                break;
            }
            if length == 0 {
                self.assert_cycle_advances(playlist, tempo);
            }
            cursor.frame += length;
            cursor.index = (cursor.index + 1) % playlist.len();
            cursor.note_count += 1;
        }

        let note = playlist.notes()[cursor.index];
        let immediate = NoteStart {
            note,
            frame: rendered,
            note_count: cursor.note_count,
        };
        cursor.frame += self.note_frames(&note, tempo);
        cursor.index = (cursor.index + 1) % playlist.len();
        cursor.note_count += 1;
        Some(immediate)
    }
}
