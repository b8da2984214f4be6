//! clicktrack - terminal metronome
//!
//! Run with: cargo run --release
//! Logs go to stderr only when RUST_LOG is set, so they do not tear the UI.
//! Set CLICKTRACK_DEVICE to play through a named output device.

mod app;
mod ui;

use std::sync::Arc;

use clicktrack::{io::CpalBackend, ClickSynth, Engine, EngineConfig, NoteId, Playlist};
use color_eyre::eyre::{Result as EyreResult, WrapErr};

use app::App;

/// Beats in the default bar
const BEATS: usize = 4;

fn main() -> EyreResult<()> {
    color_eyre::install()?;
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    }

    let backend = match std::env::var("CLICKTRACK_DEVICE") {
        Ok(name) => CpalBackend::with_device(name),
        Err(_) => CpalBackend::new(),
    };
    let engine = Engine::new(
        Box::new(backend),
        Arc::new(ClickSynth::default()),
        EngineConfig::default(),
    )
    .wrap_err("failed to create engine")?;
    engine.set_playlist(Playlist::bar(BEATS, NoteId(0), NoteId(1))?);

    let mut app = App::new(engine)?;
    let mut terminal = ratatui::init();
    let res = app.run(&mut terminal);
    ratatui::restore();
    res
}
