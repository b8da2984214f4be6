//! Onset notification.
//!
//! The render loop pushes every scheduled note into a bounded queue. A
//! dedicated notifier thread fans each onset out to the registered
//! listeners, holds it until `start_time + delay` and then runs the
//! listener's callback on the executor it asked for. Rendering and
//! notification never wait on each other.

mod listener;
pub mod queue;

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, unbounded, Receiver, Sender};

pub use listener::{Dispatch, Job, ListenerHandle, NoteOnset, Offset, OnsetListener};
use queue::{drop_oldest, DropOldestSender};

use crate::error::EngineError;

/// Message from the render loop to the notifier.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NotifierEvent {
    /// An onset stamped with the epoch it was scheduled in
    Onset(NoteOnset, u64),
    /// Forget everything pending. Only a shortcut: the epoch alone keeps
    /// stale onsets from firing, even if this message is evicted.
    DiscardAll,
}

/// Render-loop side of the notifier: stamps onsets with the current epoch.
#[derive(Clone)]
pub(crate) struct EventSender {
    events: DropOldestSender<NotifierEvent>,
    epoch: Arc<AtomicU64>,
}

impl EventSender {
    pub fn onset(&self, onset: NoteOnset) {
        let epoch = self.epoch.load(Ordering::Acquire);
        self.events.send(NotifierEvent::Onset(onset, epoch));
    }

    /// Invalidate every onset sent so far; sent on start, restart and stop.
    pub fn discard_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.events.send(NotifierEvent::DiscardAll);
    }
}

enum Command {
    Register(Registration),
    Unregister(ListenerHandle),
    Shutdown,
}

struct Registration {
    handle: ListenerHandle,
    delay: Offset,
    listener: Arc<dyn OnsetListener>,
    target: Target,
    pending: VecDeque<Pending>,
}

enum Target {
    Inline,
    Worker(Sender<Job>),
    Queue(Sender<Job>),
}

struct Pending {
    onset: NoteOnset,
    epoch: u64,
    deliver_at: Instant,
}

/// Delays of all live registrations, shared with the render loop so it can
/// size the output delay for the most negative one.
#[derive(Clone, Default)]
pub(crate) struct DelayRegistry {
    delays: Arc<Mutex<HashMap<ListenerHandle, Offset>>>,
    min_nanos: Arc<AtomicI64>,
}

impl DelayRegistry {
    fn insert(&self, handle: ListenerHandle, delay: Offset) {
        self.update(|delays| {
            delays.insert(handle, delay);
        });
    }

    fn remove(&self, handle: ListenerHandle) {
        self.update(|delays| {
            delays.remove(&handle);
        });
    }

    fn update(&self, f: impl FnOnce(&mut HashMap<ListenerHandle, Offset>)) {
        let mut delays = match self.delays.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut delays);
        let min = delays.values().map(Offset::as_nanos).min().unwrap_or(0).min(0);
        self.min_nanos.store(min, Ordering::Release);
    }

    /// Most negative delay among registrations, or zero.
    pub fn min_delay(&self) -> Offset {
        Offset::from_nanos(self.min_nanos.load(Ordering::Acquire))
    }
}

/// Owns the notifier thread. Dropping it stops the thread.
pub struct OnsetNotifier {
    commands: Sender<Command>,
    events: EventSender,
    delays: DelayRegistry,
    next_handle: AtomicU64,
    thread: Option<JoinHandle<()>>,
}

impl OnsetNotifier {
    /// Spawn the notifier thread.
    ///
    /// `capacity` bounds the onset queue; `poll` is the wake-up granularity.
    pub fn spawn(capacity: usize, poll: Duration) -> Result<Self, EngineError> {
        let (commands, command_rx) = unbounded();
        let (events, event_rx) = drop_oldest(capacity);

        let epoch = Arc::new(AtomicU64::new(0));
        let mut worker = NotifierThread {
            listeners: Vec::new(),
            commands: commands.clone(),
            epoch: epoch.clone(),
            delays: DelayRegistry::default(),
        };
        let delays = worker.delays.clone();

        let thread = thread::Builder::new()
            .name("onset-notifier".into())
            .spawn(move || worker.run(command_rx, event_rx, poll))
            .map_err(|source| EngineError::ThreadSpawn {
                name: "onset-notifier",
                source,
            })?;

        Ok(Self {
            commands,
            events: EventSender { events, epoch },
            delays,
            next_handle: AtomicU64::new(1),
            thread: Some(thread),
        })
    }

    /// Register `listener` to be told about each onset `delay` after (or,
    /// when negative, before) it is audible.
    pub fn register(
        &self,
        delay: Offset,
        dispatch: Dispatch,
        listener: Arc<dyn OnsetListener>,
    ) -> Result<ListenerHandle, EngineError> {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let target = match dispatch {
            Dispatch::Inline => Target::Inline,
            Dispatch::Queue(tx) => Target::Queue(tx),
            Dispatch::Dedicated => Target::Worker(spawn_worker(handle)?),
        };

        self.delays.insert(handle, delay);
        let registration = Registration {
            handle,
            delay,
            listener,
            target,
            pending: VecDeque::new(),
        };
        if self.commands.send(Command::Register(registration)).is_err() {
            log::warn!("notifier thread is gone; listener {handle:?} will never fire");
        }
        log::debug!("registered listener {handle:?} with delay {delay:?}");
        Ok(handle)
    }

    pub fn unregister(&self, handle: ListenerHandle) {
        self.delays.remove(handle);
        let _ = self.commands.send(Command::Unregister(handle));
    }

    pub(crate) fn delays(&self) -> DelayRegistry {
        self.delays.clone()
    }

    pub(crate) fn sender(&self) -> EventSender {
        self.events.clone()
    }

    /// Onsets evicted because the notifier fell behind.
    pub fn dropped_events(&self) -> u64 {
        self.events.events.dropped()
    }
}

impl Drop for OnsetNotifier {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("onset notifier thread panicked");
            }
        }
    }
}

fn spawn_worker(handle: ListenerHandle) -> Result<Sender<Job>, EngineError> {
    let (tx, rx) = unbounded::<Job>();
    thread::Builder::new()
        .name(format!("onset-listener-{}", handle.0))
        .spawn(move || {
            // Ends when the registration (the only sender) is dropped
            for job in rx {
                job();
            }
        })
        .map_err(|source| EngineError::ThreadSpawn {
            name: "onset-listener",
            source,
        })?;
    Ok(tx)
}

/// Run a callback, containing any panic. Returns `false` if it panicked.
fn invoke(handle: ListenerHandle, listener: &dyn OnsetListener, onset: &NoteOnset) -> bool {
    match catch_unwind(AssertUnwindSafe(|| listener.on_note_started(onset))) {
        Ok(()) => true,
        Err(_) => {
            log::warn!("listener {handle:?} panicked; unregistering it");
            false
        }
    }
}

struct NotifierThread {
    listeners: Vec<Registration>,
    commands: Sender<Command>,
    /// Bumped by the render loop on every discard; anything stamped with an
    /// older value is stale
    epoch: Arc<AtomicU64>,
    delays: DelayRegistry,
}

impl NotifierThread {
    fn run(&mut self, commands: Receiver<Command>, events: Receiver<NotifierEvent>, poll: Duration) {
        log::debug!("onset notifier running (poll {poll:?})");
        loop {
            let running = select! {
                recv(commands) -> command => match command {
                    Ok(Command::Register(registration)) => {
                        self.listeners.push(registration);
                        true
                    }
                    Ok(Command::Unregister(handle)) => {
                        self.remove(handle);
                        true
                    }
                    Ok(Command::Shutdown) | Err(_) => false,
                },
                recv(events) -> event => {
                    if let Ok(event) = event {
                        self.accept(event);
                    }
                    true
                },
                default(poll) => true,
            };
            if !running {
                break;
            }

            for event in events.try_iter() {
                self.accept(event);
            }
            self.deliver_due(Instant::now());
        }
        log::debug!("onset notifier stopped");
    }

    fn remove(&mut self, handle: ListenerHandle) {
        self.listeners.retain(|l| l.handle != handle);
        self.delays.remove(handle);
    }

    fn accept(&mut self, event: NotifierEvent) {
        match event {
            NotifierEvent::Onset(onset, epoch) => {
                if epoch != self.epoch.load(Ordering::Acquire) {
                    return;
                }
                for registration in &mut self.listeners {
                    let deliver_at = onset.start_time + registration.delay;
                    // Keep each queue ordered by delivery time
                    let at = registration
                        .pending
                        .iter()
                        .rposition(|p| p.deliver_at <= deliver_at)
                        .map_or(0, |i| i + 1);
                    registration.pending.insert(
                        at,
                        Pending {
                            onset,
                            epoch,
                            deliver_at,
                        },
                    );
                }
            }
            NotifierEvent::DiscardAll => {
                for registration in &mut self.listeners {
                    registration.pending.clear();
                }
            }
        }
    }

    fn deliver_due(&mut self, now: Instant) {
        let mut failed = Vec::new();
        let epoch_cell = &self.epoch;
        let commands = &self.commands;

        for registration in &mut self.listeners {
            while registration
                .pending
                .front()
                .is_some_and(|p| p.deliver_at <= now)
            {
                let Some(Pending { onset, epoch, .. }) = registration.pending.pop_front() else {
                    break;
                };
                if epoch != epoch_cell.load(Ordering::Acquire) {
                    continue;
                }
                let handle = registration.handle;

                let delivered = match &registration.target {
                    Target::Inline => invoke(handle, registration.listener.as_ref(), &onset),
                    Target::Worker(tx) | Target::Queue(tx) => {
                        let job = stale_checked_job(
                            handle,
                            (epoch_cell.clone(), epoch),
                            registration.listener.clone(),
                            onset,
                            commands.clone(),
                        );
                        if tx.send(job).is_err() {
                            log::warn!("executor for listener {handle:?} is gone; unregistering it");
                            false
                        } else {
                            true
                        }
                    }
                };
                if !delivered {
                    failed.push(handle);
                    break;
                }
            }
        }

        for handle in failed {
            self.remove(handle);
        }
    }
}

/// Wrap a callback so it does nothing if a discard happened after handoff,
/// and unregisters its listener if it panics.
fn stale_checked_job(
    handle: ListenerHandle,
    (current, epoch): (Arc<AtomicU64>, u64),
    listener: Arc<dyn OnsetListener>,
    onset: NoteOnset,
    commands: Sender<Command>,
) -> Job {
    Box::new(move || {
        if current.load(Ordering::Acquire) != epoch {
            return;
        }
        if !invoke(handle, listener.as_ref(), &onset) {
            let _ = commands.send(Command::Unregister(handle));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencing::{Note, NoteId};
    use std::sync::atomic::AtomicBool;

    fn onset(count: u64, start_time: Instant) -> NoteOnset {
        NoteOnset {
            note: Note::quarter(NoteId(0)),
            start_time,
            note_count: count,
        }
    }

    fn recorder() -> (Arc<dyn OnsetListener>, Receiver<(u64, Instant)>) {
        let (tx, rx) = unbounded();
        let listener = move |o: &NoteOnset| {
            let _ = tx.send((o.note_count, Instant::now()));
        };
        (Arc::new(listener), rx)
    }

    #[test]
    fn delivers_after_start_plus_delay() {
        let notifier = OnsetNotifier::spawn(64, Duration::from_millis(1)).unwrap();
        let (listener, rx) = recorder();
        notifier
            .register(Offset::from_millis(30), Dispatch::Inline, listener)
            .unwrap();
        // Let the registration land before the onset
        thread::sleep(Duration::from_millis(10));

        let start = Instant::now();
        notifier.sender().onset(onset(7, start));

        let (count, at) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(count, 7);
        assert!(at >= start + Duration::from_millis(30));
    }

    #[test]
    fn negative_delay_fires_early() {
        let notifier = OnsetNotifier::spawn(64, Duration::from_millis(1)).unwrap();
        let (listener, rx) = recorder();
        notifier
            .register(Offset::from_millis(-150), Dispatch::Dedicated, listener)
            .unwrap();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(notifier.delays().min_delay(), Offset::from_millis(-150));

        let start = Instant::now() + Duration::from_millis(200);
        notifier.sender().onset(onset(1, start));

        let (_, at) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(at < start);
    }

    #[test]
    fn discard_all_drops_pending() {
        let notifier = OnsetNotifier::spawn(64, Duration::from_millis(1)).unwrap();
        let (listener, rx) = recorder();
        notifier
            .register(Offset::ZERO, Dispatch::Inline, listener)
            .unwrap();
        thread::sleep(Duration::from_millis(10));

        let later = Instant::now() + Duration::from_millis(100);
        let sender = notifier.sender();
        sender.onset(onset(1, later));
        sender.onset(onset(2, later));
        sender.discard_all();
        sender.onset(onset(0, Instant::now()));

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap().0, 0);
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn discard_survives_queue_overflow() {
        // Room for two events only, so the discard marker gets evicted
        let notifier = OnsetNotifier::spawn(2, Duration::from_millis(1)).unwrap();
        let (tx, rx) = unbounded();
        let stalled = AtomicBool::new(false);
        let listener = move |o: &NoteOnset| {
            if !stalled.swap(true, Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(200));
            }
            let _ = tx.send(o.note_count);
        };
        notifier
            .register(Offset::ZERO, Dispatch::Inline, Arc::new(listener))
            .unwrap();
        thread::sleep(Duration::from_millis(10));

        let sender = notifier.sender();
        sender.onset(onset(7, Instant::now() + Duration::from_millis(100)));
        sender.onset(onset(6, Instant::now()));
        // Let the listener block on onset 6
        thread::sleep(Duration::from_millis(50));
        sender.discard_all();
        sender.onset(onset(0, Instant::now()));
        sender.onset(onset(1, Instant::now()));

        let mut delivered = Vec::new();
        while let Ok(count) = rx.recv_timeout(Duration::from_millis(500)) {
            delivered.push(count);
        }
        assert_eq!(delivered, vec![6, 0, 1]);
        assert!(notifier.dropped_events() >= 1);
    }

    #[test]
    fn panicking_listener_is_dropped_others_keep_going() {
        let notifier = OnsetNotifier::spawn(64, Duration::from_millis(1)).unwrap();
        let bad = notifier
            .register(
                Offset::from_millis(-5),
                Dispatch::Inline,
                Arc::new(|_: &NoteOnset| panic!("listener bug")),
            )
            .unwrap();
        let (listener, rx) = recorder();
        notifier
            .register(Offset::ZERO, Dispatch::Inline, listener)
            .unwrap();
        thread::sleep(Duration::from_millis(10));

        let sender = notifier.sender();
        sender.onset(onset(1, Instant::now()));
        sender.onset(onset(2, Instant::now()));

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap().0, 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap().0, 2);
        thread::sleep(Duration::from_millis(20));
        // The panicking listener no longer contributes to the output delay
        assert_eq!(notifier.delays().min_delay(), Offset::ZERO);
        notifier.unregister(bad);
    }

    #[test]
    fn queue_dispatch_hands_jobs_to_the_caller() {
        let notifier = OnsetNotifier::spawn(64, Duration::from_millis(1)).unwrap();
        let (jobs_tx, jobs_rx) = unbounded::<Job>();
        let (listener, rx) = recorder();
        notifier
            .register(Offset::ZERO, Dispatch::Queue(jobs_tx), listener)
            .unwrap();
        thread::sleep(Duration::from_millis(10));

        notifier.sender().onset(onset(3, Instant::now()));
        let job = jobs_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(rx.try_recv().is_err());
        job();
        assert_eq!(rx.try_recv().unwrap().0, 3);
    }

    #[test]
    fn stale_jobs_are_skipped_after_discard() {
        let notifier = OnsetNotifier::spawn(64, Duration::from_millis(1)).unwrap();
        let (jobs_tx, jobs_rx) = unbounded::<Job>();
        let (listener, rx) = recorder();
        notifier
            .register(Offset::ZERO, Dispatch::Queue(jobs_tx), listener)
            .unwrap();
        thread::sleep(Duration::from_millis(10));

        notifier.sender().onset(onset(3, Instant::now()));
        let job = jobs_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        notifier.sender().discard_all();
        thread::sleep(Duration::from_millis(20));
        job();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unregistered_listener_stops_receiving() {
        let notifier = OnsetNotifier::spawn(64, Duration::from_millis(1)).unwrap();
        let (listener, rx) = recorder();
        let handle = notifier
            .register(Offset::ZERO, Dispatch::Inline, listener)
            .unwrap();
        thread::sleep(Duration::from_millis(10));
        notifier.unregister(handle);
        thread::sleep(Duration::from_millis(10));

        notifier.sender().onset(onset(1, Instant::now()));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
