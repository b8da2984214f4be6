pub mod engine; // Render loop, scheduling, mixing
pub mod error;
pub mod io; // Output devices
pub mod notify; // Onset listeners
pub mod samples; // PCM per note and sample rate
pub mod sequencing; // Notes, durations, playlists

pub use engine::{Engine, EngineConfig, PlaybackState, MAX_TEMPO};
pub use error::{EngineError, SinkError};
pub use notify::{Dispatch, ListenerHandle, NoteOnset, Offset, OnsetListener};
pub use samples::{ClickSynth, SampleProvider};
pub use sequencing::{Note, NoteDuration, NoteId, Playlist};
