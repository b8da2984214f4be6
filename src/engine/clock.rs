//! Frame ⇄ time mapping.
//!
//! The render stream counts frames; listeners and sync requests speak
//! `Instant`s. `FrameClock` holds one anchor pair (a frame and the moment
//! that frame is audible) and extrapolates linearly at the sink's sample
//! rate. The render loop re-anchors it on the sink's reported playback
//! position so drift between the device clock and the monotonic clock
//! never accumulates.

use std::time::{Duration, Instant};

const NANOS_PER_SEC: i128 = 1_000_000_000;

#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    sample_rate: u32,
    anchor_frame: i64,
    anchor_time: Instant,
}

impl FrameClock {
    pub fn new(sample_rate: u32, anchor_frame: i64, anchor_time: Instant) -> Self {
        assert!(sample_rate > 0, "sample rate must be positive");
        Self {
            sample_rate,
            anchor_frame,
            anchor_time,
        }
    }

    /// Re-anchor: `frame` is audible at `time`.
    pub fn resync(&mut self, frame: i64, time: Instant) {
        self.anchor_frame = frame;
        self.anchor_time = time;
    }

    /// Moment at which `frame` is audible.
    pub fn frame_to_time(&self, frame: i64) -> Instant {
        let delta = frame - self.anchor_frame;
        let nanos = delta.unsigned_abs() as u128 * NANOS_PER_SEC as u128 / self.sample_rate as u128;
        let offset = Duration::from_nanos(nanos as u64);
        if delta >= 0 {
            self.anchor_time + offset
        } else {
            // Instants before the platform epoch cannot be represented
            self.anchor_time
                .checked_sub(offset)
                .unwrap_or(self.anchor_time)
        }
    }

    /// Frame audible at `time`, rounded to the nearest frame.
    pub fn time_to_frame(&self, time: Instant) -> i64 {
        let nanos: i128 = if time >= self.anchor_time {
            time.duration_since(self.anchor_time).as_nanos() as i128
        } else {
            -(self.anchor_time.duration_since(time).as_nanos() as i128)
        };
        let scaled = nanos * self.sample_rate as i128;
        // Round half away from zero
        let half = NANOS_PER_SEC / 2;
        let frames = if scaled >= 0 {
            (scaled + half) / NANOS_PER_SEC
        } else {
            (scaled - half) / NANOS_PER_SEC
        };
        self.anchor_frame + frames as i64
    }

    /// Frames spanned by `duration`, rounded to the nearest frame.
    pub fn duration_to_frames(&self, duration: Duration) -> i64 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_exact_after_anchor() {
        let now = Instant::now();
        for rate in [8_000, 44_100, 48_000, 96_000] {
            let clock = FrameClock::new(rate, 1_000, now);
            for frame in [1_000, 1_001, 1_777, 44_100, 10_000_000, 123_456_789] {
                let t = clock.frame_to_time(frame);
                assert_eq!(clock.time_to_frame(t), frame, "rate {rate}");
            }
        }
    }

    #[test]
    fn one_second_of_frames() {
        let now = Instant::now();
        let clock = FrameClock::new(48_000, 0, now);
        assert_eq!(clock.frame_to_time(48_000), now + Duration::from_secs(1));
        assert_eq!(clock.time_to_frame(now + Duration::from_millis(500)), 24_000);
    }

    #[test]
    fn times_before_the_anchor_map_to_earlier_frames() {
        let now = Instant::now() + Duration::from_secs(10);
        let clock = FrameClock::new(48_000, 100_000, now);
        assert_eq!(clock.time_to_frame(now - Duration::from_secs(1)), 52_000);
        assert_eq!(clock.frame_to_time(52_000), now - Duration::from_secs(1));
    }

    #[test]
    fn resync_moves_the_reference() {
        let now = Instant::now();
        let mut clock = FrameClock::new(48_000, 0, now);
        let later = now + Duration::from_millis(3);
        clock.resync(480, later);
        assert_eq!(clock.frame_to_time(480), later);
        assert_eq!(clock.time_to_frame(later + Duration::from_millis(10)), 960);
    }

    #[test]
    fn duration_to_frames_rounds() {
        let clock = FrameClock::new(48_000, 0, Instant::now());
        assert_eq!(clock.duration_to_frames(Duration::from_millis(500)), 24_000);
        assert_eq!(clock.duration_to_frames(Duration::from_nanos(10_417)), 1);
    }
}
