//! PCM sources for notes.
//!
//! The engine never decodes audio itself. A [`SampleProvider`] hands out
//! mono, normalized buffers per note and sample rate; the [`SampleBank`]
//! caches them so each `(note, rate)` pair is requested exactly once.

mod click;

use std::collections::HashMap;
use std::sync::Arc;

pub use click::ClickSynth;

use crate::sequencing::NoteId;

/// Source of pre-decoded PCM for a note at a given sample rate.
///
/// Called from the render thread when a new rate or note is first seen, so
/// implementations should return quickly (resample or decode ahead of time).
pub trait SampleProvider: Send + Sync {
    /// Mono samples normalized to `[-1, 1]`.
    fn pcm(&self, id: NoteId, sample_rate: u32) -> Arc<[f32]>;
}

impl<F> SampleProvider for F
where
    F: Fn(NoteId, u32) -> Arc<[f32]> + Send + Sync,
{
    fn pcm(&self, id: NoteId, sample_rate: u32) -> Arc<[f32]> {
        self(id, sample_rate)
    }
}

/// Keyed cache of immutable PCM buffers, owned by the render loop.
pub struct SampleBank {
    provider: Arc<dyn SampleProvider>,
    buffers: HashMap<(NoteId, u32), Arc<[f32]>>,
}

impl SampleBank {
    pub fn new(provider: Arc<dyn SampleProvider>) -> Self {
        Self {
            provider,
            buffers: HashMap::new(),
        }
    }

    /// Populate `(id, sample_rate)` if missing and return the buffer.
    pub fn load(&mut self, id: NoteId, sample_rate: u32) -> Arc<[f32]> {
        self.buffers
            .entry((id, sample_rate))
            .or_insert_with(|| {
                log::debug!("loading samples for {id:?} at {sample_rate} Hz");
                self.provider.pcm(id, sample_rate)
            })
            .clone()
    }

    /// Populate every id at `sample_rate`.
    pub fn preload(&mut self, ids: impl IntoIterator<Item = NoteId>, sample_rate: u32) {
        for id in ids {
            self.load(id, sample_rate);
        }
    }

    /// Cached buffer, if already loaded. Never calls the provider.
    pub fn get(&self, id: NoteId, sample_rate: u32) -> Option<&[f32]> {
        self.buffers.get(&(id, sample_rate)).map(|b| &b[..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn loads_each_key_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let provider = move |_id: NoteId, rate: u32| -> Arc<[f32]> {
            counter.fetch_add(1, Ordering::SeqCst);
            vec![0.5; (rate / 1000) as usize].into()
        };
        let mut bank = SampleBank::new(Arc::new(provider));

        bank.load(NoteId(0), 48_000);
        bank.load(NoteId(0), 48_000);
        bank.preload([NoteId(0), NoteId(1)], 48_000);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        bank.load(NoteId(0), 44_100);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(bank.get(NoteId(0), 44_100).map(|b| b.len()), Some(44));
        assert!(bank.get(NoteId(2), 48_000).is_none());
    }
}
