//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clicktrack::io::OfflineBackend;
use clicktrack::{Engine, EngineConfig, NoteId, SampleProvider};

/// Every note is `SAMPLE_LEN` samples of 1.0, at any rate
pub const SAMPLE_LEN: usize = 100;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn flat_samples() -> Arc<dyn SampleProvider> {
    Arc::new(|_: NoteId, _: u32| -> Arc<[f32]> { vec![1.0; SAMPLE_LEN].into() })
}

pub fn engine(backend: OfflineBackend, config: EngineConfig) -> Engine {
    init_logging();
    Engine::new(Box::new(backend), flat_samples(), config).unwrap()
}

/// Poll `condition` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
    true
}

/// Indices of samples that are not silent.
pub fn sounding(samples: &[f32]) -> Vec<usize> {
    samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.abs() > 0.0)
        .map(|(i, _)| i)
        .collect()
}
