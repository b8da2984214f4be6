//! Benchmarks for the render path.
//!
//! Run with: cargo bench
//!
//! One render cycle (schedule + mix) must finish well inside the time the
//! device takes to play the buffer it produces.
//!
//! Reference timing at 48kHz sample rate:
//!   - 64 samples  = 1.33ms deadline
//!   - 128 samples = 2.67ms deadline
//!   - 256 samples = 5.33ms deadline
//!   - 512 samples = 10.67ms deadline

use criterion::{criterion_group, criterion_main};

mod engine;

/// Common buffer sizes used in audio applications.
pub const BLOCK_SIZES: &[usize] = &[64, 128, 256, 512];

criterion_group!(
    benches,
    engine::bench_scheduler,
    engine::bench_mixer,
);
criterion_main!(benches);
