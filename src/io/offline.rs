//! In-memory output device.
//!
//! Captures everything written to it, optionally paced to real time, and
//! lets a test (or headless tool) simulate routing changes and write
//! failures through an [`OfflineHandle`].

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use super::{AudioBackend, AudioSink, PlaybackTimestamp, SinkConfig};
use crate::error::SinkError;

struct Shared {
    native_rate: AtomicU32,
    min_buffer: AtomicUsize,
    route_generation: AtomicU64,
    device_generation: AtomicU64,
    fail_writes: AtomicUsize,
    opens: AtomicUsize,
    realtime: bool,
    capture_limit: AtomicUsize,
    captured: Mutex<Vec<f32>>,
    written: AtomicU64,
    open_rates: Mutex<Vec<u32>>,
}

/// Backend whose sinks write into memory.
pub struct OfflineBackend {
    shared: Arc<Shared>,
}

/// Inspect and manipulate an [`OfflineBackend`] from another thread.
#[derive(Clone)]
pub struct OfflineHandle {
    shared: Arc<Shared>,
}

impl OfflineBackend {
    /// Unpaced backend: writes return immediately until `capture_limit`
    /// frames have been captured, after which writes are dropped and paced
    /// to real time so an idle session does not spin.
    pub fn new(sample_rate: u32) -> Self {
        Self::build(sample_rate, false)
    }

    /// Backend paced like a real device: `write` blocks while two buffers
    /// are already queued, and playback timestamps are reported.
    pub fn realtime(sample_rate: u32) -> Self {
        Self::build(sample_rate, true)
    }

    fn build(sample_rate: u32, realtime: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                native_rate: AtomicU32::new(sample_rate),
                min_buffer: AtomicUsize::new(0),
                route_generation: AtomicU64::new(0),
                device_generation: AtomicU64::new(0),
                fail_writes: AtomicUsize::new(0),
                opens: AtomicUsize::new(0),
                realtime,
                capture_limit: AtomicUsize::new(sample_rate as usize * 60),
                captured: Mutex::new(Vec::new()),
                written: AtomicU64::new(0),
                open_rates: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn with_min_buffer(self, frames: usize) -> Self {
        self.shared.min_buffer.store(frames, Ordering::Relaxed);
        self
    }

    /// Cap on captured frames (default: one minute of audio).
    pub fn with_capture_limit(self, frames: usize) -> Self {
        self.shared.capture_limit.store(frames, Ordering::Relaxed);
        self
    }

    pub fn handle(&self) -> OfflineHandle {
        OfflineHandle {
            shared: self.shared.clone(),
        }
    }
}

impl OfflineHandle {
    /// Copy of everything captured so far, across all opened sinks.
    pub fn captured(&self) -> Vec<f32> {
        lock(&self.shared.captured).clone()
    }

    pub fn captured_frames(&self) -> usize {
        lock(&self.shared.captured).len()
    }

    /// Frames accepted by `write`, captured or not.
    pub fn written_frames(&self) -> u64 {
        self.shared.written.load(Ordering::Acquire)
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::Acquire)
    }

    /// Sample rates sinks were opened at, in order.
    pub fn open_rates(&self) -> Vec<u32> {
        lock(&self.shared.open_rates).clone()
    }

    /// Pretend the output was rerouted to a device with these properties.
    pub fn simulate_route_change(&self, native_rate: u32, min_buffer: usize) {
        self.shared.native_rate.store(native_rate, Ordering::Release);
        self.shared.min_buffer.store(min_buffer, Ordering::Release);
        self.shared.route_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Pretend the device of every open sink went away. Reopening yields an
    /// identical device.
    pub fn simulate_device_loss(&self) {
        self.shared.device_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Make the next `count` writes fail.
    pub fn fail_writes(&self, count: usize) {
        self.shared.fail_writes.store(count, Ordering::Release);
    }

    /// Block until at least `frames` frames were written or `timeout` passed.
    pub fn wait_for_frames(&self, frames: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.written_frames() < frames {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl AudioBackend for OfflineBackend {
    fn native_sample_rate(&self) -> Result<u32, SinkError> {
        Ok(self.shared.native_rate.load(Ordering::Acquire))
    }

    fn min_buffer_frames(&self, _sample_rate: u32) -> Result<usize, SinkError> {
        Ok(self.shared.min_buffer.load(Ordering::Acquire))
    }

    fn open(&mut self, config: SinkConfig) -> Result<Box<dyn AudioSink>, SinkError> {
        if config.sample_rate == 0 || config.buffer_frames == 0 {
            return Err(SinkError::UnsupportedConfig(format!("{config:?}")));
        }
        self.shared.opens.fetch_add(1, Ordering::AcqRel);
        lock(&self.shared.open_rates).push(config.sample_rate);
        log::debug!("offline sink opened: {config:?}");

        Ok(Box::new(OfflineSink {
            shared: self.shared.clone(),
            config,
            opened_at: Instant::now(),
            frames: 0,
            route_generation: Cell::new(self.shared.route_generation.load(Ordering::Acquire)),
            device_generation: self.shared.device_generation.load(Ordering::Acquire),
            stopped: false,
        }))
    }
}

struct OfflineSink {
    shared: Arc<Shared>,
    config: SinkConfig,
    opened_at: Instant,
    /// Frames written to this sink
    frames: u64,
    route_generation: Cell<u64>,
    device_generation: u64,
    stopped: bool,
}

impl OfflineSink {
    fn capture_full(&self) -> bool {
        lock(&self.shared.captured).len() >= self.shared.capture_limit.load(Ordering::Relaxed)
    }

    /// Moment frame `frame` of this sink plays.
    fn frame_time(&self, frame: u64) -> Instant {
        self.opened_at + Duration::from_secs_f64(frame as f64 / self.config.sample_rate as f64)
    }
}

impl AudioSink for OfflineSink {
    fn config(&self) -> SinkConfig {
        self.config
    }

    fn write(&mut self, buffer: &[f32]) -> Result<(), SinkError> {
        if self.stopped {
            return Err(SinkError::Closed);
        }
        if self.shared.device_generation.load(Ordering::Acquire) != self.device_generation {
            return Err(SinkError::DeviceLost);
        }
        let failing = self
            .shared
            .fail_writes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(SinkError::Stream("injected write failure".into()));
        }

        if self.shared.realtime {
            // Room for two buffers ahead of the playback position
            let queued = (2 * self.config.buffer_frames) as u64;
            let release = self.frame_time((self.frames + buffer.len() as u64).saturating_sub(queued));
            let now = Instant::now();
            if release > now {
                thread::sleep(release - now);
            }
        } else if self.capture_full() {
            thread::sleep(Duration::from_secs_f64(
                buffer.len() as f64 / self.config.sample_rate as f64,
            ));
        }

        {
            let limit = self.shared.capture_limit.load(Ordering::Relaxed);
            let mut captured = lock(&self.shared.captured);
            if captured.len() < limit {
                let room = limit - captured.len();
                captured.extend_from_slice(&buffer[..buffer.len().min(room)]);
            }
        }
        self.frames += buffer.len() as u64;
        self.shared
            .written
            .fetch_add(buffer.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    fn timestamp(&self) -> Option<PlaybackTimestamp> {
        if !self.shared.realtime {
            return None;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(self.opened_at).as_secs_f64();
        let frame = ((elapsed * self.config.sample_rate as f64) as u64).min(self.frames);
        Some(PlaybackTimestamp {
            frame,
            time: self.frame_time(frame),
        })
    }

    fn latency_frames(&self) -> usize {
        0
    }

    fn take_routing_change(&self) -> bool {
        let current = self.shared.route_generation.load(Ordering::Acquire);
        current != self.route_generation.replace(current)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(backend: &mut OfflineBackend) -> Box<dyn AudioSink> {
        backend
            .open(SinkConfig {
                sample_rate: 48_000,
                buffer_frames: 64,
            })
            .unwrap()
    }

    #[test]
    fn captures_writes_up_to_the_limit() {
        let mut backend = OfflineBackend::new(48_000).with_capture_limit(100);
        let handle = backend.handle();
        let mut sink = open(&mut backend);

        sink.write(&[0.5; 64]).unwrap();
        sink.write(&[0.25; 64]).unwrap();

        let captured = handle.captured();
        assert_eq!(captured.len(), 100);
        assert_eq!(captured[63], 0.5);
        assert_eq!(captured[64], 0.25);
        assert_eq!(handle.written_frames(), 128);
    }

    #[test]
    fn route_change_is_reported_once() {
        let mut backend = OfflineBackend::new(48_000);
        let handle = backend.handle();
        let sink = open(&mut backend);

        assert!(!sink.take_routing_change());
        handle.simulate_route_change(44_100, 512);
        assert!(sink.take_routing_change());
        assert!(!sink.take_routing_change());
        assert_eq!(backend.native_sample_rate().unwrap(), 44_100);
        assert_eq!(backend.min_buffer_frames(44_100).unwrap(), 512);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut backend = OfflineBackend::new(48_000);
        let handle = backend.handle();
        let mut sink = open(&mut backend);

        handle.fail_writes(1);
        assert!(sink.write(&[0.0; 64]).is_err());
        assert!(sink.write(&[0.0; 64]).is_ok());
    }

    #[test]
    fn lost_device_fails_open_sinks_only() {
        let mut backend = OfflineBackend::new(48_000);
        let handle = backend.handle();
        let mut old = open(&mut backend);

        handle.simulate_device_loss();
        assert!(matches!(old.write(&[0.0; 64]), Err(SinkError::DeviceLost)));
        let mut new = open(&mut backend);
        assert!(new.write(&[0.0; 64]).is_ok());
    }

    #[test]
    fn realtime_writes_are_paced() {
        let mut backend = OfflineBackend::realtime(48_000);
        let mut sink = open(&mut backend);
        let start = Instant::now();

        // 2 buffers go straight in, the remaining 48 wait for ~48 * 64 frames
        for _ in 0..50 {
            sink.write(&[0.0; 64]).unwrap();
        }
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(60), "{elapsed:?}");

        let ts = sink.timestamp().unwrap();
        assert!(ts.frame <= 50 * 64);
    }
}
