//! Beat widget - one box per beat, the current one flashes

use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use super::UiState;

pub fn render_beats(frame: &mut Frame, area: Rect, state: &UiState) {
    if state.beats == 0 || area.width < state.beats as u16 * 3 {
        return;
    }

    let constraints = vec![Constraint::Ratio(1, state.beats as u32); state.beats];
    let cells = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(constraints)
        .split(area);

    for (beat, cell) in cells.iter().enumerate() {
        let lit = state.lit && state.current == Some(beat);
        let fill = match (lit, state.accent) {
            (true, true) => Color::LightRed,
            (true, false) => Color::LightGreen,
            (false, _) => Color::Reset,
        };
        let border = if state.current == Some(beat) {
            Color::White
        } else {
            Color::DarkGray
        };

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .style(Style::default().bg(fill));
        // Roughly center the number vertically
        let padding = "\n".repeat((cell.height.saturating_sub(3) / 2) as usize);
        let label = Paragraph::new(format!("{padding}{}", beat + 1))
            .alignment(Alignment::Center)
            .style(Style::default().add_modifier(Modifier::BOLD))
            .block(block);
        frame.render_widget(label, *cell);
    }
}
