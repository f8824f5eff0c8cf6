//! Bounded work queue — typed, capacity-limited, multi-producer/multi-consumer.
//!
//! `enqueue` suspends the caller when the queue is full; it never drops and
//! never fails while consumers are alive. Draining is done by looping
//! `next()`, which suspends when the queue is empty and resolves to `None`
//! once the shutdown signal is raised. Closing is always cooperative through
//! an external [`Shutdown`] signal — the queue has no close method of its own.

use tokio::sync::{Mutex, mpsc, watch};

use crate::error::QueueError;

// ── Shutdown signal ─────────────────────────────────────────────────

/// Cooperative cancellation signal shared by every stage.
///
/// Cheap to clone; workers check it between drain iterations and long
/// handlers may observe it mid-flight. Dropping the [`ShutdownHandle`]
/// counts as raising the signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// The raising side of the shutdown signal. Owned by whoever runs the
/// pipeline; raising is idempotent.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Create a linked handle/signal pair.
pub fn shutdown_pair() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

impl Shutdown {
    /// Non-blocking check, used between drain iterations.
    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal is raised (or the handle is dropped).
    pub async fn raised(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without raising — treat as raised.
                return;
            }
        }
    }
}

impl ShutdownHandle {
    /// Raise the signal. All stages observe it; in-flight handlers may
    /// finish, but no new handler invocations start.
    pub fn raise(&self) {
        let _ = self.tx.send(true);
    }

    /// Derive a new signal linked to this handle.
    pub fn signal(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

// ── Work queue ──────────────────────────────────────────────────────

/// Bounded MPMC queue for one pipeline stage.
///
/// Producers share the sender; consumers take turns on the receiver behind
/// an async mutex, so any number of workers can drain concurrently.
pub struct WorkQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    capacity: usize,
}

impl<T: Send> WorkQueue<T> {
    /// Create a queue with a fixed capacity (clamped to >= 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    /// The fixed capacity chosen at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue an item, suspending while the queue is at capacity.
    ///
    /// Fails only when every consumer is gone, which cannot happen while the
    /// queue itself is alive (it owns the receiver).
    pub async fn enqueue(&self, item: T) -> Result<(), QueueError> {
        self.tx.send(item).await.map_err(|_| QueueError::Closed)
    }

    /// Take the next item, suspending while the queue is empty.
    ///
    /// Returns `None` once `shutdown` is raised; queued-but-undrained items
    /// are abandoned at that point, per the no-new-work cancellation rule.
    pub async fn next(&self, shutdown: &Shutdown) -> Option<T> {
        if shutdown.is_raised() {
            return None;
        }
        let mut rx = self.rx.lock().await;
        tokio::select! {
            item = rx.recv() => item,
            _ = shutdown.raised() => None,
        }
    }
}
