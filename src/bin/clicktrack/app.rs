//! App - owns the engine, turns key presses into engine calls and onsets
//! into beat flashes

use std::time::{Duration, Instant};

use clicktrack::{
    notify::Job, Dispatch, Engine, NoteId, NoteOnset, Offset, PlaybackState, MAX_TEMPO,
};
use color_eyre::eyre::Result as EyreResult;
use crossbeam_channel::{unbounded, Receiver};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::DefaultTerminal;

use super::ui::{self, UiState};
use super::BEATS;

/// Beat flashes are primed this much ahead of the click
const VISUAL_LEAD_MS: i64 = 20;
/// How long a beat stays lit after its click
const FLASH: Duration = Duration::from_millis(120);
/// Taps further apart than this start a new tap sequence
const TAP_RESET: Duration = Duration::from_millis(2500);
const MESSAGE_TTL: Duration = Duration::from_secs(3);
const ACCENT: NoteId = NoteId(0);

/// Which beat is lit, driven by onset notifications.
struct BeatView {
    current: Option<usize>,
    accent: bool,
    lit_until: Instant,
    /// Index the next onset belongs to, after a jump or restart
    expected: Option<usize>,
}

impl BeatView {
    fn new() -> Self {
        Self {
            current: None,
            accent: false,
            lit_until: Instant::now(),
            expected: None,
        }
    }

    fn on_onset(&mut self, onset: &NoteOnset) {
        let index = match self.expected.take() {
            Some(index) => index,
            None if onset.note.id == ACCENT => 0,
            None => self.current.map_or(0, |c| (c + 1) % BEATS),
        };
        self.current = Some(index);
        self.accent = onset.note.id == ACCENT;
        self.lit_until = onset.start_time + FLASH;
    }

    fn clear(&mut self) {
        self.current = None;
        self.expected = None;
    }
}

pub struct App {
    engine: Engine,
    /// Listener callbacks, run on this (UI) thread
    jobs: Receiver<Job>,
    onsets: Receiver<NoteOnset>,
    beats: BeatView,
    taps: Vec<Instant>,
    message: Option<(String, Instant)>,
    should_quit: bool,
}

impl App {
    pub fn new(engine: Engine) -> EyreResult<Self> {
        let (jobs_tx, jobs) = unbounded();
        let (onset_tx, onsets) = unbounded();
        engine.register_listener(
            Offset::from_millis(-VISUAL_LEAD_MS),
            Dispatch::Queue(jobs_tx),
            move |onset: &NoteOnset| {
                let _ = onset_tx.send(*onset);
            },
        )?;

        Ok(Self {
            engine,
            jobs,
            onsets,
            beats: BeatView::new(),
            taps: Vec::new(),
            message: None,
            should_quit: false,
        })
    }

    /// Run the UI event loop until quit
    pub fn run(&mut self, terminal: &mut DefaultTerminal) -> EyreResult<()> {
        while !self.should_quit {
            for job in self.jobs.try_iter() {
                job();
            }
            for onset in self.onsets.try_iter() {
                self.beats.on_onset(&onset);
            }

            let state = self.snapshot();
            terminal.draw(|frame| ui::render(frame, &state))?;

            // Short poll keeps flashes within a frame of the click
            if event::poll(Duration::from_millis(8))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key.code);
                    }
                }
            }
        }

        self.engine.stop();
        Ok(())
    }

    fn handle_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => {
                self.should_quit = true;
            }
            KeyCode::Char(' ') => self.toggle_playback(),
            KeyCode::Char('+') | KeyCode::Char('=') => self.nudge_tempo(1.0),
            KeyCode::Char('-') => self.nudge_tempo(-1.0),
            KeyCode::Up => self.nudge_tempo(10.0),
            KeyCode::Down => self.nudge_tempo(-10.0),
            KeyCode::Char('m') | KeyCode::Char('M') => {
                self.engine.set_mute(!self.engine.is_muted());
            }
            KeyCode::Char('r') | KeyCode::Char('R') => {
                self.engine.restart();
                self.beats.expected = Some(0);
            }
            KeyCode::Char('t') | KeyCode::Char('T') => self.tap(Instant::now()),
            KeyCode::Char(c @ '1'..='9') => {
                let index = (c as usize - '1' as usize) % BEATS;
                self.engine.set_next_note_index(index);
                self.beats.expected = Some(index);
            }
            _ => {}
        }
    }

    fn toggle_playback(&mut self) {
        if self.engine.state() == PlaybackState::Running {
            self.engine.stop();
            self.beats.clear();
            // Drop flashes that were already queued
            for _ in self.jobs.try_iter() {}
            for _ in self.onsets.try_iter() {}
        } else if let Err(err) = self.engine.start() {
            self.show(format!("cannot start: {err}"));
        }
    }

    fn nudge_tempo(&mut self, delta: f64) {
        let tempo = (self.engine.tempo() + delta).clamp(1.0, MAX_TEMPO);
        if let Err(err) = self.engine.set_tempo(tempo) {
            self.show(err.to_string());
        }
    }

    /// Tap tempo: the average interval of recent taps becomes the beat, and
    /// the bar's first note is aligned with the taps.
    fn tap(&mut self, now: Instant) {
        if self
            .taps
            .last()
            .is_some_and(|&last| now.duration_since(last) > TAP_RESET)
        {
            self.taps.clear();
        }
        self.taps.push(now);
        if self.taps.len() > 8 {
            self.taps.remove(0);
        }
        if self.taps.len() < 2 {
            self.show("tap again...".into());
            return;
        }

        let (first, last) = (self.taps[0], self.taps[self.taps.len() - 1]);
        let beat = last.duration_since(first) / (self.taps.len() as u32 - 1);
        let tempo = 60.0 / beat.as_secs_f64();
        match self.engine.set_tempo(tempo) {
            Ok(()) => {
                let _ = self.engine.synchronize(last, beat);
                self.show(format!("tapped {tempo:.1} BPM"));
            }
            Err(err) => self.show(err.to_string()),
        }
    }

    fn show(&mut self, message: String) {
        self.message = Some((message, Instant::now() + MESSAGE_TTL));
    }

    fn snapshot(&mut self) -> UiState {
        let now = Instant::now();
        if self.message.as_ref().is_some_and(|(_, until)| *until <= now) {
            self.message = None;
        }

        UiState {
            state: self.engine.state(),
            tempo: self.engine.tempo(),
            muted: self.engine.is_muted(),
            sample_rate: self.engine.sample_rate(),
            note_count: self.engine.note_count(),
            dropped: self.engine.dropped_events(),
            beats: BEATS,
            current: self.beats.current,
            lit: self.beats.current.is_some() && now < self.beats.lit_until,
            accent: self.beats.accent,
            message: self.message.as_ref().map(|(m, _)| m.clone()),
        }
    }
}
