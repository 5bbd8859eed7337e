//! Bounded hand-off from network callbacks to a consumer thread.
//!
//! Callbacks run on the async runtime and must never block it. [`HandoffQueue::offer`]
//! therefore never waits: when the consumer falls behind, new items are
//! dropped and counted.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Create a queue holding at most `capacity` items.
pub fn handoff<T>(capacity: usize) -> (HandoffQueue<T>, HandoffReceiver<T>) {
    let (tx, rx) = channel::bounded(capacity);
    (
        HandoffQueue {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        HandoffReceiver { rx },
    )
}

/// Producer side. Cheap to clone.
#[derive(Debug)]
pub struct HandoffQueue<T> {
    tx: Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for HandoffQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> HandoffQueue<T> {
    /// Enqueue without blocking. Returns `false` if the item was dropped.
    pub fn offer(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, "hand-off queue full, dropping item");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("hand-off consumer gone, dropping item");
                false
            }
        }
    }

    /// Items dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct HandoffReceiver<T> {
    rx: Receiver<T>,
}

impl<T> HandoffReceiver<T> {
    /// The oldest queued item, if any.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Drain the queue and return only the newest item.
    pub fn latest(&self) -> Option<T> {
        self.rx.try_iter().last()
    }

    /// Wait up to `timeout` for an item. `None` on timeout or when every
    /// producer is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}
