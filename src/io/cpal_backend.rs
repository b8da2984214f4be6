//! Output through the system audio device via cpal.
//!
//! cpal pulls samples from a callback; the engine pushes them with a
//! blocking `write`. An rtrb ring buffer sits between the two: the render
//! thread fills it and waits while it is full, the device callback drains
//! it and plays silence on underrun.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use rtrb::{Consumer, Producer, RingBuffer};

use super::{AudioBackend, AudioSink, PlaybackTimestamp, SinkConfig};
use crate::error::SinkError;

/// Buffers of headroom in the ring between render thread and device
const RING_BUFFERS: usize = 2;
/// A write that makes no progress for this long fails
const STALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Backend for the default (or a named) output device of the default host.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    device_name: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the output device called `name` instead of the default one.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    fn device(&self) -> Result<cpal::Device, SinkError> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host.default_output_device().ok_or(SinkError::NoDevice),
            Some(name) => host
                .output_devices()
                .map_err(|e| SinkError::Open(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| &n == name))
                .ok_or(SinkError::NoDevice),
        }
    }

    fn default_config(&self) -> Result<(cpal::Device, cpal::SupportedStreamConfig), SinkError> {
        let device = self.device()?;
        let config = device
            .default_output_config()
            .map_err(|e| SinkError::UnsupportedConfig(e.to_string()))?;
        Ok((device, config))
    }
}

impl AudioBackend for CpalBackend {
    fn native_sample_rate(&self) -> Result<u32, SinkError> {
        Ok(self.default_config()?.1.sample_rate().0)
    }

    fn min_buffer_frames(&self, _sample_rate: u32) -> Result<usize, SinkError> {
        Ok(match self.default_config()?.1.buffer_size() {
            cpal::SupportedBufferSize::Range { min, .. } => *min as usize,
            cpal::SupportedBufferSize::Unknown => 0,
        })
    }

    fn open(&mut self, config: SinkConfig) -> Result<Box<dyn AudioSink>, SinkError> {
        let (device, supported) = self.default_config()?;
        let channels = supported.channels();
        let format = supported.sample_format();

        let fixed = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.buffer_frames as u32),
        };
        let (stream, producer, shared) = match build_stream(&device, &fixed, format, config) {
            Ok(built) => built,
            Err(err) => {
                log::debug!("fixed buffer size rejected ({err}), using the device default");
                let flexible = cpal::StreamConfig {
                    buffer_size: cpal::BufferSize::Default,
                    ..fixed
                };
                build_stream(&device, &flexible, format, config)?
            }
        };
        stream.play().map_err(|e| SinkError::Open(e.to_string()))?;

        log::info!(
            "opened {} at {} Hz, {} frames, {} channels, {format}",
            device.name().unwrap_or_else(|_| "output device".into()),
            config.sample_rate,
            config.buffer_frames,
            channels
        );

        Ok(Box::new(CpalSink {
            stream,
            producer,
            shared,
            config,
        }))
    }
}

/// State shared between the device callback and the sink.
#[derive(Default)]
struct StreamShared {
    /// The device went away; the stream will never play again
    lost: AtomicBool,
    failed: AtomicBool,
    consumed: AtomicU64,
    timestamp: Mutex<Option<PlaybackTimestamp>>,
}

fn build_stream(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    format: cpal::SampleFormat,
    config: SinkConfig,
) -> Result<(cpal::Stream, Producer<f32>, Arc<StreamShared>), SinkError> {
    let (producer, consumer) = RingBuffer::new(config.buffer_frames * RING_BUFFERS);
    let shared = Arc::new(StreamShared::default());
    let channels = stream_config.channels as usize;

    let stream = match format {
        cpal::SampleFormat::F32 => {
            output_stream::<f32>(device, stream_config, channels, consumer, shared.clone())
        }
        cpal::SampleFormat::I16 => {
            output_stream::<i16>(device, stream_config, channels, consumer, shared.clone())
        }
        cpal::SampleFormat::U16 => {
            output_stream::<u16>(device, stream_config, channels, consumer, shared.clone())
        }
        other => {
            return Err(SinkError::UnsupportedConfig(format!(
                "sample format {other}"
            )))
        }
    }
    .map_err(|e| SinkError::Open(e.to_string()))?;

    Ok((stream, producer, shared))
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    mut consumer: Consumer<f32>,
    shared: Arc<StreamShared>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let errors = shared.clone();
    device.build_output_stream(
        config,
        move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
            let ts = info.timestamp();
            let latency = ts.playback.duration_since(&ts.callback).unwrap_or_default();
            let first = shared.consumed.load(Ordering::Relaxed);
            // Never block the device thread; a missed update is fine
            if let Ok(mut slot) = shared.timestamp.try_lock() {
                *slot = Some(PlaybackTimestamp {
                    frame: first,
                    time: Instant::now() + latency,
                });
            }

            let mut consumed = 0;
            for frame in data.chunks_mut(channels) {
                let sample = match consumer.pop() {
                    Ok(s) => {
                        consumed += 1;
                        s
                    }
                    Err(_) => 0.0,
                };
                let value = T::from_sample(sample);
                frame.fill(value);
            }
            shared.consumed.fetch_add(consumed, Ordering::Relaxed);
        },
        move |err| match err {
            cpal::StreamError::DeviceNotAvailable => {
                log::info!("output device went away");
                errors.lost.store(true, Ordering::Release);
            }
            other => {
                log::warn!("output stream error: {other}");
                errors.failed.store(true, Ordering::Release);
            }
        },
        None,
    )
}

/// Push `buffer` into the ring, waiting while it is full. Fails as soon as
/// the device is gone or broken, or after `stall_timeout` without progress.
fn push_blocking(
    producer: &mut Producer<f32>,
    shared: &StreamShared,
    buffer: &[f32],
    stall_timeout: Duration,
) -> Result<(), SinkError> {
    let mut remaining = buffer;
    let mut last_progress = Instant::now();

    while !remaining.is_empty() {
        if shared.lost.load(Ordering::Acquire) {
            return Err(SinkError::DeviceLost);
        }
        if shared.failed.load(Ordering::Acquire) {
            return Err(SinkError::Stream("device reported an error".into()));
        }

        let n = producer.slots().min(remaining.len());
        if n == 0 {
            if last_progress.elapsed() > stall_timeout {
                return Err(SinkError::Stalled);
            }
            thread::sleep(Duration::from_micros(500));
            continue;
        }
        for &sample in &remaining[..n] {
            let _ = producer.push(sample);
        }
        remaining = &remaining[n..];
        last_progress = Instant::now();
    }
    Ok(())
}

struct CpalSink {
    stream: cpal::Stream,
    producer: Producer<f32>,
    shared: Arc<StreamShared>,
    config: SinkConfig,
}

impl AudioSink for CpalSink {
    fn config(&self) -> SinkConfig {
        self.config
    }

    fn write(&mut self, buffer: &[f32]) -> Result<(), SinkError> {
        push_blocking(&mut self.producer, &self.shared, buffer, STALL_TIMEOUT)
    }

    fn timestamp(&self) -> Option<PlaybackTimestamp> {
        self.shared.timestamp.lock().ok().and_then(|slot| *slot)
    }

    fn latency_frames(&self) -> usize {
        self.config.buffer_frames * RING_BUFFERS
    }

    /// cpal only reports a route change as a lost device, which already
    /// fails the next `write`.
    fn take_routing_change(&self) -> bool {
        false
    }

    fn stop(&mut self) {
        if let Err(err) = self.stream.pause() {
            log::debug!("pausing output stream failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_device_fails_the_write_without_queueing() {
        let (mut producer, consumer) = RingBuffer::new(64);
        let shared = StreamShared::default();
        shared.lost.store(true, Ordering::Release);

        let result = push_blocking(&mut producer, &shared, &[0.5; 32], STALL_TIMEOUT);
        assert!(matches!(result, Err(SinkError::DeviceLost)));
        assert_eq!(consumer.slots(), 0);
    }

    #[test]
    fn writes_fill_the_ring_then_stall() {
        let (mut producer, consumer) = RingBuffer::new(64);
        let shared = StreamShared::default();

        push_blocking(&mut producer, &shared, &[0.5; 48], STALL_TIMEOUT).unwrap();
        assert_eq!(consumer.slots(), 48);

        // Nobody drains the ring
        let result = push_blocking(&mut producer, &shared, &[0.5; 48], Duration::from_millis(20));
        assert!(matches!(result, Err(SinkError::Stalled)));
    }

    #[test]
    fn stream_errors_fail_the_write() {
        let (mut producer, _consumer) = RingBuffer::new(64);
        let shared = StreamShared::default();
        shared.failed.store(true, Ordering::Release);

        let result = push_blocking(&mut producer, &shared, &[0.5; 8], STALL_TIMEOUT);
        assert!(matches!(result, Err(SinkError::Stream(_))));
    }
}
