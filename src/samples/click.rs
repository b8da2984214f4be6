use std::f32::consts::TAU;
use std::sync::Arc;

use super::SampleProvider;
use crate::sequencing::NoteId;

/// Clave-style clicks rendered on demand: a sine burst with a 1 ms attack
/// and exponential decay. Higher ids get lower pitches so an accent
/// (`NoteId(0)`) stands out from regular beats.
#[derive(Debug, Clone)]
pub struct ClickSynth {
    /// Pitch of `NoteId(0)` in Hz
    pub base_frequency: f32,
    /// Click length in seconds
    pub length: f32,
    /// Decay time constant in seconds
    pub decay: f32,
}

impl Default for ClickSynth {
    fn default() -> Self {
        Self {
            base_frequency: 2500.0,
            length: 0.04,
            decay: 0.008,
        }
    }
}

impl ClickSynth {
    pub fn frequency(&self, id: NoteId) -> f32 {
        // Each id steps down a fifth
        self.base_frequency * (2.0f32 / 3.0).powi(id.0 as i32)
    }

    pub fn render(&self, id: NoteId, sample_rate: u32) -> Vec<f32> {
        let sr = sample_rate as f32;
        let len = (self.length * sr).round().max(1.0) as usize;
        let attack = (0.001 * sr).max(1.0);
        let phase_inc = TAU * self.frequency(id) / sr;

        (0..len)
            .map(|i| {
                let t = i as f32;
                let env = if t < attack {
                    t / attack
                } else {
                    (-(t - attack) / (self.decay * sr)).exp()
                };
                (phase_inc * t).sin() * env
            })
            .collect()
    }
}

impl SampleProvider for ClickSynth {
    fn pcm(&self, id: NoteId, sample_rate: u32) -> Arc<[f32]> {
        self.render(id, sample_rate).into()
    }
}
