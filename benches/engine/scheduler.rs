//! Scheduling cost per block, from a sparse bar to dense tuplets.

use std::hint::black_box;

use clicktrack::engine::scheduler::{Cursor, Scheduler};
use clicktrack::{Note, NoteDuration, NoteId, Playlist};
use criterion::{BenchmarkId, Criterion};

use crate::BLOCK_SIZES;

const SAMPLE_RATE: u32 = 48_000;

pub fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine/scheduler");
    let scheduler = Scheduler::new(SAMPLE_RATE);

    let bar = Playlist::bar(4, NoteId(0), NoteId(1)).unwrap();
    let dense = Playlist::new(
        (0..15)
            .map(|i| Note::quarter(NoteId(i % 3)).with_duration(NoteDuration::SixteenthQuintuplet))
            .collect(),
    )
    .unwrap();

    for &size in BLOCK_SIZES {
        // === 4/4 bar at 120 BPM: a note every 24000 frames ===
        group.bench_with_input(BenchmarkId::new("bar_120bpm", size), &size, |b, &size| {
            let mut cursor = Cursor::START;
            let mut rendered = 0i64;
            let mut out = Vec::with_capacity(16);
            b.iter(|| {
                out.clear();
                scheduler.advance(&mut cursor, black_box(&bar), 120.0, rendered, size, &mut out);
                rendered += size as i64;
                black_box(out.len())
            });
        });

        // === Sixteenth quintuplets at the tempo limit: several notes per block ===
        group.bench_with_input(BenchmarkId::new("quintuplets_2000bpm", size), &size, |b, &size| {
            let mut cursor = Cursor::START;
            let mut rendered = 0i64;
            let mut out = Vec::with_capacity(64);
            b.iter(|| {
                out.clear();
                scheduler.advance(&mut cursor, black_box(&dense), 2000.0, rendered, size, &mut out);
                rendered += size as i64;
                black_box(out.len())
            });
        });
    }

    group.finish();
}
