//! Mixing cost per block with 1 and 8 overlapping clicks.

use std::hint::black_box;
use std::sync::Arc;

use clicktrack::engine::mixer::{Mixer, QueuedNote};
use clicktrack::samples::SampleBank;
use clicktrack::{ClickSynth, NoteId};
use criterion::{BatchSize, BenchmarkId, Criterion};

use crate::BLOCK_SIZES;

const SAMPLE_RATE: u32 = 48_000;

fn clicks(count: usize) -> Vec<QueuedNote> {
    (0..count)
        .map(|i| QueuedNote {
            id: NoteId((i % 4) as u8),
            start_frame: (i * 37) as i64,
            volume: 0.5,
        })
        .collect()
}

pub fn bench_mixer(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/mixer");
    let mixer = Mixer::new(SAMPLE_RATE);
    let mut bank = SampleBank::new(Arc::new(ClickSynth::default()));
    bank.preload((0..4).map(NoteId), SAMPLE_RATE);

    for &size in BLOCK_SIZES {
        let mut buffer = vec![0.0f32; size];

        for voices in [1, 8] {
            let notes = clicks(voices);
            group.bench_with_input(
                BenchmarkId::new(format!("{voices}_clicks"), size),
                &size,
                |b, _| {
                    b.iter_batched(
                        || notes.clone(),
                        |mut notes| {
                            mixer.render(black_box(&mut buffer), 256, &mut notes, &bank);
                            notes
                        },
                        BatchSize::SmallInput,
                    );
                },
            );
        }
    }

    group.finish();
}
