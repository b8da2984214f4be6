//! Control plane between caller threads and the render thread.
//!
//! Every control kind is "last write wins": callers overwrite a single
//! slot and the render loop drains it at most once per cycle. Nothing in
//! here blocks the render thread; the playlist slot is read with
//! `try_lock` and simply skipped when contended.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;

use super::scheduler::SyncRequest;
use crate::sequencing::Playlist;

/// Single-slot mailbox holding only the most recent value.
pub struct LatestCell<T> {
    slot: ArcSwapOption<T>,
}

impl<T> LatestCell<T> {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
        }
    }

    /// Replace whatever is pending.
    pub fn set(&self, value: T) {
        self.slot.store(Some(Arc::new(value)));
    }

    /// Take the pending value, leaving the slot empty.
    pub fn take(&self) -> Option<Arc<T>> {
        self.slot.swap(None)
    }

    pub fn clear(&self) {
        self.slot.store(None);
    }
}

impl<T> Default for LatestCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// `f64` stored as bits in an `AtomicU64`.
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// Everything callers can change while the render loop runs.
pub(crate) struct ControlPlane {
    tempo: AtomicF64,
    muted: AtomicBool,
    restart: AtomicBool,
    pub sync: LatestCell<SyncRequest>,
    pub next_index: LatestCell<usize>,
    /// Current playlist, kept for new sessions
    playlist: Mutex<Arc<Playlist>>,
    /// Set when `playlist` changed and the render loop has not picked it up
    playlist_dirty: AtomicBool,
}

impl ControlPlane {
    pub fn new(playlist: Playlist, tempo: f64) -> Self {
        Self {
            tempo: AtomicF64::new(tempo),
            muted: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            sync: LatestCell::new(),
            next_index: LatestCell::new(),
            playlist: Mutex::new(Arc::new(playlist)),
            playlist_dirty: AtomicBool::new(false),
        }
    }

    pub fn tempo(&self) -> f64 {
        self.tempo.load()
    }

    pub fn set_tempo(&self, tempo: f64) {
        self.tempo.store(tempo);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn request_restart(&self) {
        self.restart.store(true, Ordering::Release);
    }

    pub fn take_restart(&self) -> bool {
        self.restart.swap(false, Ordering::AcqRel)
    }

    /// Blocking read for caller threads.
    pub fn playlist(&self) -> Arc<Playlist> {
        match self.playlist.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_playlist(&self, playlist: Playlist) {
        let playlist = Arc::new(playlist);
        match self.playlist.lock() {
            Ok(mut guard) => *guard = playlist,
            Err(poisoned) => *poisoned.into_inner() = playlist,
        }
        self.playlist_dirty.store(true, Ordering::Release);
    }

    /// Render-thread read: a new snapshot if one is pending and the lock
    /// is free, otherwise `None` (keep using the previous snapshot).
    pub fn try_take_playlist(&self) -> Option<Arc<Playlist>> {
        if !self.playlist_dirty.load(Ordering::Acquire) {
            return None;
        }
        let guard = self.playlist.try_lock().ok()?;
        self.playlist_dirty.store(false, Ordering::Release);
        Some(guard.clone())
    }

    /// Drop pending one-shot requests at the start of a session.
    pub fn clear_pending(&self) {
        self.restart.store(false, Ordering::Release);
        self.sync.clear();
        self.next_index.clear();
        self.playlist_dirty.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencing::NoteId;

    #[test]
    fn latest_cell_keeps_only_last_write() {
        let cell = LatestCell::new();
        cell.set(1usize);
        cell.set(2);
        cell.set(3);
        assert_eq!(cell.take().as_deref(), Some(&3));
        assert!(cell.take().is_none());
    }

    #[test]
    fn playlist_snapshot_is_taken_once() {
        let control = ControlPlane::new(Playlist::bar(4, NoteId(0), NoteId(1)).unwrap(), 120.0);
        assert!(control.try_take_playlist().is_none());

        control.set_playlist(Playlist::bar(3, NoteId(0), NoteId(1)).unwrap());
        control.set_playlist(Playlist::bar(5, NoteId(0), NoteId(1)).unwrap());
        assert_eq!(control.try_take_playlist().map(|p| p.len()), Some(5));
        assert!(control.try_take_playlist().is_none());
        assert_eq!(control.playlist().len(), 5);
    }

    #[test]
    fn contended_playlist_is_skipped() {
        let control = ControlPlane::new(Playlist::bar(4, NoteId(0), NoteId(1)).unwrap(), 120.0);
        control.set_playlist(Playlist::bar(2, NoteId(0), NoteId(1)).unwrap());

        let guard = control.playlist.lock().unwrap();
        assert!(control.try_take_playlist().is_none());
        drop(guard);
        assert_eq!(control.try_take_playlist().map(|p| p.len()), Some(2));
    }

    #[test]
    fn restart_flag_is_one_shot() {
        let control = ControlPlane::new(Playlist::bar(1, NoteId(0), NoteId(0)).unwrap(), 60.0);
        control.request_restart();
        control.request_restart();
        assert!(control.take_restart());
        assert!(!control.take_restart());
    }
}
