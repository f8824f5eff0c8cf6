//! Worker pool runner — N concurrent consumers over one bounded queue.
//!
//! Each worker loops "take next item → invoke handler → on failure, call the
//! failure hook and keep looping" until the shutdown signal fires. One item's
//! failure never stops the other workers or the loop itself.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::queue::{Shutdown, WorkQueue};

/// Handler invoked once per drained work item.
#[async_trait]
pub trait WorkHandler<T: Send + 'static>: Send + Sync {
    /// Process one item. Long handlers may observe `shutdown` mid-flight.
    async fn handle(&self, item: T, shutdown: &Shutdown) -> Result<(), Error>;

    /// Failure hook, invoked when `handle` returns an error. Overridable;
    /// the default logs and moves on.
    fn on_failure(&self, err: &Error) {
        tracing::error!(error = %err, "work item failed");
    }
}

/// A running pool of worker loops over one queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` consumer loops (clamped to >= 1) against `queue`.
    pub fn start<T>(
        queue: Arc<WorkQueue<T>>,
        handler: Arc<dyn WorkHandler<T>>,
        workers: usize,
        shutdown: Shutdown,
    ) -> Self
    where
        T: Send + 'static,
    {
        let workers = workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for n in 0..workers {
            let queue = Arc::clone(&queue);
            let handler = Arc::clone(&handler);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                while let Some(item) = queue.next(&shutdown).await {
                    if let Err(e) = handler.handle(item, &shutdown).await {
                        handler.on_failure(&e);
                    }
                }
                tracing::debug!(worker = n, "worker loop exited");
            }));
        }
        Self { handles }
    }

    /// Number of worker loops in this pool.
    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker loop to exit. Returns only after all N loops
    /// have observed the shutdown signal and finished any in-flight item.
    pub async fn join(self) {
        join_all(self.handles).await;
    }
}
