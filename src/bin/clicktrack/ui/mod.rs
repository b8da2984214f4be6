//! TUI module for clicktrack
//!
//! Stateless rendering: the app builds a [`UiState`] snapshot every frame.

mod beats;
mod transport;

use clicktrack::PlaybackState;
use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    widgets::Paragraph,
    Frame,
};

use beats::render_beats;
use transport::render_transport;

/// Everything one frame of the UI shows
pub struct UiState {
    pub state: PlaybackState,
    pub tempo: f64,
    pub muted: bool,
    pub sample_rate: Option<u32>,
    pub note_count: u64,
    pub dropped: u64,
    pub beats: usize,
    /// Beat the last onset belonged to
    pub current: Option<usize>,
    /// Whether `current` is still flashing
    pub lit: bool,
    pub accent: bool,
    pub message: Option<String>,
}

pub fn render(frame: &mut Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Transport bar
            Constraint::Min(5),    // Beats
            Constraint::Length(1), // Status message
            Constraint::Length(1), // Help bar
        ])
        .split(frame.area());

    render_transport(frame, chunks[0], state);
    render_beats(frame, chunks[1], state);

    if let Some(message) = &state.message {
        let status = Paragraph::new(format!(" {message}")).style(Style::default().fg(Color::Yellow));
        frame.render_widget(status, chunks[2]);
    }

    let help = Paragraph::new(
        " [Space] Start/Stop  [+/-] Tempo  [M] Mute  [R] Restart  [T] Tap  [1-4] Jump  [Q] Quit",
    )
    .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, chunks[3]);
}
