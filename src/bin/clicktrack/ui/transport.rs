//! Transport bar widget - shows tempo, play state, output rate and counters

use clicktrack::PlaybackState;
use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use super::UiState;

pub fn render_transport(frame: &mut Frame, area: Rect, state: &UiState) {
    let block = Block::default().title(" clicktrack ").borders(Borders::ALL);

    let (symbol, label, color) = match state.state {
        PlaybackState::Running => ("▶", "Playing", Color::Green),
        PlaybackState::Starting => ("…", "Starting", Color::Yellow),
        PlaybackState::Stopping => ("…", "Stopping", Color::Yellow),
        PlaybackState::Stopped => ("■", "Stopped", Color::Yellow),
    };

    // e.g. 48000 -> "48.0kHz"
    let rate = state
        .sample_rate
        .map_or_else(|| "--".to_string(), |r| format!("{:.1}kHz", r as f64 / 1000.0));

    let mut spans = vec![
        Span::styled(
            format!(" BPM: {:.1}  ", state.tempo),
            Style::default().fg(Color::Cyan),
        ),
        Span::styled(format!("{symbol} {label}  "), Style::default().fg(color)),
        Span::styled(
            format!("Notes: {}  ", state.note_count),
            Style::default().fg(Color::White),
        ),
        Span::styled(format!("{rate}  "), Style::default().fg(Color::DarkGray)),
    ];
    if state.muted {
        spans.push(Span::styled("MUTED  ", Style::default().fg(Color::Red)));
    }
    if state.dropped > 0 {
        spans.push(Span::styled(
            format!("dropped: {}", state.dropped),
            Style::default().fg(Color::Magenta),
        ));
    }

    let paragraph = Paragraph::new(Line::from(spans)).block(block);
    frame.render_widget(paragraph, area);
}
