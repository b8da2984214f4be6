pub mod duration;
pub mod note;
pub mod playlist;

pub use duration::Duration;
pub use note::{Note, NoteDuration, NoteId};
pub use playlist::Playlist;
