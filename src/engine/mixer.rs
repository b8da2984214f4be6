//! Sample-accurate summing of in-flight notes.

use crate::samples::SampleBank;
use crate::sequencing::NoteId;

/// A note whose samples are (partly) still to be rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedNote {
    pub id: NoteId,
    /// Absolute frame of the first sample, output delay included
    pub start_frame: i64,
    pub volume: f32,
}

/// Renders queued notes into fixed-size blocks.
///
/// The output is a plain sum: loud overlapping notes can exceed `[-1, 1]`.
/// No limiting is applied.
#[derive(Debug, Clone, Copy)]
pub struct Mixer {
    sample_rate: u32,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Overwrite `out` with the mix of `notes` for frames
    /// `[first_frame, first_frame + out.len())`, then drop notes that have
    /// nothing left to play.
    ///
    /// Notes whose samples are not in `bank` are treated as silent.
    pub fn render(
        &self,
        out: &mut [f32],
        first_frame: i64,
        notes: &mut Vec<QueuedNote>,
        bank: &SampleBank,
    ) {
        out.fill(0.0);
        let end_frame = first_frame + out.len() as i64;

        notes.retain(|note| {
            let samples = bank.get(note.id, self.sample_rate).unwrap_or(&[]);
            let note_end = note.start_frame + samples.len() as i64;

            let from = first_frame.max(note.start_frame);
            let to = end_frame.min(note_end);
            if from < to {
                let out_range = (from - first_frame) as usize..(to - first_frame) as usize;
                let sample_range = (from - note.start_frame) as usize..(to - note.start_frame) as usize;
                for (o, &s) in out[out_range].iter_mut().zip(&samples[sample_range]) {
                    *o += note.volume * s;
                }
            }

            // Keep while samples remain at or after the next block
            note_end > end_frame
        });
    }
}
