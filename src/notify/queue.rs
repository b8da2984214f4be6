//! Bounded multi-producer queue that evicts the oldest entry when full.
//!
//! The producer side never blocks: a full queue drops its oldest entry to
//! make room. Memory stays bounded if the consumer stalls, at the cost of
//! losing the stalest messages first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

pub struct DropOldestSender<T> {
    tx: Sender<T>,
    /// Second handle on the receiving end, used only to evict
    evict: Receiver<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for DropOldestSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            evict: self.evict.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

/// Create a queue holding at most `capacity` messages.
pub fn drop_oldest<T>(capacity: usize) -> (DropOldestSender<T>, Receiver<T>) {
    let (tx, rx) = bounded(capacity.max(1));
    let sender = DropOldestSender {
        tx,
        evict: rx.clone(),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, rx)
}

impl<T> DropOldestSender<T> {
    /// Enqueue `value`, evicting old entries if needed.
    pub fn send(&self, mut value: T) {
        loop {
            match self.tx.try_send(value) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(v)) => {
                    value = v;
                    if self.evict.try_recv().is_ok() {
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if total.is_power_of_two() {
                            log::warn!("event queue full, {total} events dropped so far");
                        }
                    }
                }
            }
        }
    }

    /// Number of messages evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let (tx, rx) = drop_oldest(3);
        for i in 0..5 {
            tx.send(i);
        }
        assert_eq!(tx.dropped(), 2);
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn never_blocks_without_a_consumer() {
        let (tx, rx) = drop_oldest::<u32>(2);
        drop(rx);
        for i in 0..100 {
            tx.send(i);
        }
        assert_eq!(tx.dropped(), 98);
    }
}
