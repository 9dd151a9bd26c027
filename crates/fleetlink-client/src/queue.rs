//! Poll work queue between the long-poll loop and the poll-service worker
//!
//! A queue of capacity `C` holds at most `C - 1` pending entries. The
//! producer never blocks: a full queue rejects the newest entry and leaves
//! the pending ones untouched.

use flume::{Receiver, Sender, TrySendError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue already holds `capacity - 1` entries
    #[error("poll work queue is full ({pending} pending)")]
    Full { pending: usize },

    /// The consuming worker is not running
    #[error("poll work queue is closed")]
    Closed,
}

/// Producer side, owned by the connection manager.
#[derive(Debug, Clone)]
pub struct PollWorkQueue {
    tx: Sender<u8>,
    capacity: usize,
}

/// Consumer side, owned by the poll-service worker.
#[derive(Debug)]
pub struct PollWorkReceiver {
    rx: Receiver<u8>,
}

/// Creates a queue of the given capacity.
pub fn poll_work_queue(capacity: usize) -> (PollWorkQueue, PollWorkReceiver) {
    let (tx, rx) = flume::bounded(capacity.saturating_sub(1).max(1));
    (PollWorkQueue { tx, capacity }, PollWorkReceiver { rx })
}

impl PollWorkQueue {
    /// Enqueues one `portsToOpen` entry without blocking.
    pub fn enqueue(&self, ports: u8) -> Result<(), QueueError> {
        self.tx.try_send(ports).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full {
                pending: self.tx.len(),
            },
            TrySendError::Disconnected(_) => QueueError::Closed,
        })
    }

    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_disconnected()
    }
}

impl PollWorkReceiver {
    /// Waits for the next entry; `None` once every producer is gone.
    pub async fn recv(&self) -> Option<u8> {
        self.rx.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<u8> {
        self.rx.try_recv().ok()
    }

    /// Drops every pending entry, returning how many were discarded.
    pub fn clear(&self) -> usize {
        self.rx.drain().count()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
