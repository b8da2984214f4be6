//! Scheduler and mixer benchmarks at the usual block sizes.

mod mixer;
mod scheduler;

pub use mixer::bench_mixer;
pub use scheduler::bench_scheduler;
