//! The render thread.
//!
//! One session is one run of [`run`]: open the sink, then cycle
//! control → schedule → mix → write until cancelled. The blocking write is
//! the only thing that paces the loop. Device failures never end the
//! session; the sink is reopened and playback continues from the same
//! cursor.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use super::clock::FrameClock;
use super::control::ControlPlane;
use super::mixer::{Mixer, QueuedNote};
use super::scheduler::{Cursor, NoteStart, Scheduler};
use super::{EngineConfig, PlaybackState};
use crate::error::SinkError;
use crate::io::{AudioBackend, AudioSink, SinkConfig};
use crate::notify::{DelayRegistry, EventSender, NoteOnset, Offset};
use crate::samples::{SampleBank, SampleProvider};
use crate::sequencing::Playlist;

/// Pause between attempts to reopen a failed sink
const REOPEN_BACKOFF: Duration = Duration::from_millis(100);

/// Session status readable from any thread.
#[derive(Default)]
pub(crate) struct Status {
    state: AtomicU8,
    sample_rate: AtomicU32,
    note_count: AtomicU64,
}

impl Status {
    pub fn state(&self) -> PlaybackState {
        PlaybackState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: PlaybackState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Rate of the open sink, if any.
    pub fn sample_rate(&self) -> Option<u32> {
        match self.sample_rate.load(Ordering::Acquire) {
            0 => None,
            rate => Some(rate),
        }
    }

    pub fn note_count(&self) -> u64 {
        self.note_count.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.sample_rate.store(0, Ordering::Release);
    }
}

/// Everything a session needs, moved onto the render thread.
pub(crate) struct RenderContext {
    pub backend: Arc<Mutex<Box<dyn AudioBackend>>>,
    pub provider: Arc<dyn SampleProvider>,
    pub control: Arc<ControlPlane>,
    pub events: EventSender,
    pub delays: DelayRegistry,
    pub status: Arc<Status>,
    pub cancel: Arc<AtomicBool>,
    pub config: EngineConfig,
}

/// Frames needed to realize the most negative listener delay.
pub(crate) fn output_delay_frames(min_delay: Offset, sample_rate: u32) -> i64 {
    if !min_delay.is_negative() {
        return 0;
    }
    (min_delay.abs().as_secs_f64() * sample_rate as f64).ceil() as i64
}

/// Output delay for this cycle. It may grow at any time, but only shrinks
/// when the timeline is realigned (session start, restart, sync, rate
/// change) so no note is pulled ahead of one already queued.
pub(crate) fn settle_output_delay(current: Option<i64>, desired: i64, realign: bool) -> i64 {
    match current {
        Some(current) if !realign => current.max(desired),
        _ => desired,
    }
}

/// Run one playback session. The result of the first sink open is sent on
/// `ready`; the session only continues if it succeeded.
pub(crate) fn run(ctx: RenderContext, ready: Sender<Result<u32, SinkError>>) {
    let mut session = Session::new(ctx);
    session.ctx.events.discard_all();

    let mut output = match session.open() {
        Ok(output) => {
            let _ = ready.send(Ok(output.config.sample_rate));
            output
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    session.ctx.status.set_state(PlaybackState::Running);

    while !session.cancelled() {
        if let Err(err) = session.cycle(&mut output) {
            log::warn!("output failed: {err}; reopening");
            output.sink.stop();
            drop(output);
            match session.reopen() {
                Some(reopened) => output = reopened,
                None => return,
            }
            continue;
        }

        if output.sink.take_routing_change() && session.needs_reopen(&output) {
            log::info!("output routing changed; reopening");
            output.sink.stop();
            drop(output);
            match session.reopen() {
                Some(reopened) => output = reopened,
                None => return,
            }
        }
    }

    output.sink.stop();
    log::debug!(
        "render loop stopped after {} frames, {} notes",
        session.rendered,
        session.cursor.note_count
    );
}

/// An opened sink plus everything derived from its configuration.
struct Output {
    sink: Box<dyn AudioSink>,
    config: SinkConfig,
    scheduler: Scheduler,
    mixer: Mixer,
    clock: FrameClock,
    /// Render frame that plays as frame 0 of this sink
    sink_base: i64,
    last_anchor: Instant,
}

struct Session {
    ctx: RenderContext,
    bank: SampleBank,
    playlist: Arc<Playlist>,
    cursor: Cursor,
    /// Frames written since the session (or the current sample rate) began
    rendered: i64,
    sample_rate: Option<u32>,
    /// Frames every note is shifted by; `None` until the first cycle
    output_delay: Option<i64>,
    notes: Vec<QueuedNote>,
    starts: Vec<NoteStart>,
    buffer: Vec<f32>,
}

impl Session {
    fn new(ctx: RenderContext) -> Self {
        let bank = SampleBank::new(ctx.provider.clone());
        let playlist = ctx.control.playlist();
        Self {
            ctx,
            bank,
            playlist,
            cursor: Cursor::START,
            rendered: 0,
            sample_rate: None,
            output_delay: None,
            notes: Vec::new(),
            starts: Vec::new(),
            buffer: Vec::new(),
        }
    }

    fn cancelled(&self) -> bool {
        self.ctx.cancel.load(Ordering::Acquire)
    }

    /// Sink parameters the device wants right now.
    fn desired_config(&self, backend: &dyn AudioBackend) -> Result<SinkConfig, SinkError> {
        let sample_rate = match self.ctx.config.sample_rate {
            Some(rate) => rate,
            None => backend.native_sample_rate()?,
        };
        let min_buffer = backend.min_buffer_frames(sample_rate)?;
        Ok(SinkConfig {
            sample_rate,
            buffer_frames: self.ctx.config.buffer_frames.max(min_buffer),
        })
    }

    fn open(&mut self) -> Result<Output, SinkError> {
        let sink = {
            let mut backend = self
                .ctx
                .backend
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let config = self.desired_config(&**backend)?;
            backend.open(config)?
        };
        Ok(self.adopt(sink))
    }

    /// Retry opening until it works or the session is cancelled.
    fn reopen(&mut self) -> Option<Output> {
        let mut attempts = 0u32;
        loop {
            if self.cancelled() {
                return None;
            }
            match self.open() {
                Ok(output) => {
                    if attempts > 0 {
                        log::info!("output reopened after {} failed attempts", attempts);
                    }
                    return Some(output);
                }
                Err(err) => {
                    if attempts == 0 {
                        log::warn!("reopening output failed: {err}; retrying");
                    } else {
                        log::debug!("reopen attempt {} failed: {err}", attempts + 1);
                    }
                    attempts += 1;
                    thread::sleep(REOPEN_BACKOFF);
                }
            }
        }
    }

    /// Take over a freshly opened sink, carrying playback state across a
    /// sample-rate change if there is one.
    fn adopt(&mut self, sink: Box<dyn AudioSink>) -> Output {
        let config = sink.config();
        let rate = config.sample_rate;

        if let Some(previous) = self.sample_rate.filter(|&p| p != rate) {
            let remaining = self.cursor.frame - self.rendered;
            let rescaled = (remaining as f64 * rate as f64 / previous as f64).round() as i64;
            log::info!("sample rate changed from {previous} to {rate} Hz");
            self.cursor.frame = rescaled;
            self.rendered = 0;
            self.notes.clear();
            self.output_delay = None;
        }
        self.sample_rate = Some(rate);
        self.bank.preload(self.playlist.note_ids(), rate);
        self.buffer.resize(config.buffer_frames, 0.0);

        let latency = Duration::from_secs_f64(sink.latency_frames() as f64 / rate as f64);
        let now = Instant::now();
        self.ctx.status.sample_rate.store(rate, Ordering::Release);

        Output {
            sink,
            config,
            scheduler: Scheduler::new(rate),
            mixer: Mixer::new(rate),
            clock: FrameClock::new(rate, self.rendered, now + latency),
            sink_base: self.rendered,
            last_anchor: now,
        }
    }

    /// Whether the device's current preferences rule out the open sink.
    fn needs_reopen(&self, output: &Output) -> bool {
        let backend = self
            .ctx
            .backend
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match self.desired_config(&**backend) {
            Ok(desired) => {
                desired.sample_rate != output.config.sample_rate
                    || desired.buffer_frames > output.config.buffer_frames
            }
            Err(err) => {
                log::debug!("querying the output device failed: {err}");
                true
            }
        }
    }

    /// One render cycle: apply controls, schedule, mix and write a buffer.
    fn cycle(&mut self, output: &mut Output) -> Result<(), SinkError> {
        let control = &self.ctx.control;
        let sample_rate = output.config.sample_rate;

        if let Some(playlist) = control.try_take_playlist() {
            self.bank.preload(playlist.note_ids(), sample_rate);
            if self.cursor.index >= playlist.len() {
                self.cursor.index = 0;
            }
            log::debug!(
                "playlist replaced ({} notes, {} quarters per cycle)",
                playlist.len(),
                playlist.loop_quarters()
            );
            self.playlist = playlist;
        }

        let tempo = control.tempo();
        if let Some(index) = control.next_index.take() {
            self.cursor.index = *index % self.playlist.len();
            log::debug!("next note index set to {}", self.cursor.index);
        }

        let restarted = control.take_restart();
        if restarted {
            self.cursor = Cursor::restart_at(self.rendered);
            self.notes.clear();
            self.ctx.events.discard_all();
            log::debug!("restarted at frame {}", self.rendered);
        }

        if output.last_anchor.elapsed() >= self.ctx.config.clock_resync_interval {
            if let Some(ts) = output.sink.timestamp() {
                output
                    .clock
                    .resync(output.sink_base + ts.frame as i64, ts.time);
            }
            output.last_anchor = Instant::now();
        }

        let sync = control.sync.take();
        let desired = output_delay_frames(self.ctx.delays.min_delay(), sample_rate);
        let output_delay =
            settle_output_delay(self.output_delay, desired, restarted || sync.is_some());
        if self.output_delay != Some(output_delay) {
            log::debug!("output delay is now {output_delay} frames");
            self.output_delay = Some(output_delay);
        }

        self.starts.clear();
        if let Some(request) = sync {
            let immediate = output.scheduler.resync(
                &request,
                &self.playlist,
                tempo,
                &mut self.cursor,
                &output.clock,
                output_delay,
                self.rendered,
            );
            self.starts.extend(immediate);
        }
        output.scheduler.advance(
            &mut self.cursor,
            &self.playlist,
            tempo,
            self.rendered,
            self.buffer.len(),
            &mut self.starts,
        );

        for start in self.starts.drain(..) {
            let frame = start.frame + output_delay;
            self.notes.push(QueuedNote {
                id: start.note.id,
                start_frame: frame,
                volume: start.note.volume,
            });
            self.ctx.events.onset(NoteOnset {
                note: start.note,
                start_time: output.clock.frame_to_time(frame),
                note_count: start.note_count,
            });
        }
        self.ctx
            .status
            .note_count
            .store(self.cursor.note_count, Ordering::Release);

        output
            .mixer
            .render(&mut self.buffer, self.rendered, &mut self.notes, &self.bank);
        if control.is_muted() {
            self.buffer.fill(0.0);
        }

        output.sink.write(&self.buffer)?;
        self.rendered += self.buffer.len() as i64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_delay_covers_the_most_negative_delay() {
        assert_eq!(output_delay_frames(Offset::ZERO, 48_000), 0);
        assert_eq!(output_delay_frames(Offset::from_millis(25), 48_000), 0);
        assert_eq!(output_delay_frames(Offset::from_millis(-20), 48_000), 960);
        // Partial frames round up
        assert_eq!(output_delay_frames(Offset::from_nanos(-1), 48_000), 1);
    }

    #[test]
    fn output_delay_shrinks_only_when_realigning() {
        assert_eq!(settle_output_delay(None, 960, false), 960);
        assert_eq!(settle_output_delay(Some(960), 2_400, false), 2_400);
        // A listener with the largest lead went away mid-run
        assert_eq!(settle_output_delay(Some(2_400), 0, false), 2_400);
        assert_eq!(settle_output_delay(Some(2_400), 0, true), 0);
    }

    #[test]
    fn status_reports_no_rate_until_opened() {
        let status = Status::default();
        assert_eq!(status.state(), PlaybackState::Stopped);
        assert_eq!(status.sample_rate(), None);
        status.sample_rate.store(44_100, Ordering::Release);
        assert_eq!(status.sample_rate(), Some(44_100));
        status.reset();
        assert_eq!(status.sample_rate(), None);
    }
}
