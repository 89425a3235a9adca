//! Entry point for messages arriving from the consumer/session layer.
//!
//! The dispatcher runs on the broker client's own delivery task. In the
//! default concurrent mode it acquires a worker (blocking when the pool is
//! exhausted, which is the engine's backpressure into the broker) and
//! spawns the delivery. In serialized mode it delivers inline on the calling
//! task, preserving strict per-consumer FIFO order.

use std::sync::Arc;

use tracing::{debug, warn};

use relaymq_core::{InboundMessage, Result};

use crate::pool::WorkerPool;
use crate::worker::{DeliveryWorker, WorkerDisposition};

/// Forwards inbound messages to the worker pool or delivers them inline.
#[derive(Debug, Clone)]
pub struct DeliveryDispatcher {
    pool: Arc<WorkerPool>,
    serialized: bool,
}

impl DeliveryDispatcher {
    /// Creates a dispatcher over the given pool.
    pub fn new(pool: Arc<WorkerPool>, serialized: bool) -> Self {
        Self { pool, serialized }
    }

    /// Returns true if deliveries run inline on the dispatching task.
    pub fn is_serialized(&self) -> bool {
        self.serialized
    }

    /// Hands a message to a delivery worker.
    ///
    /// Returns an error only when no worker can be obtained because the pool
    /// is shutting down; delivery failures themselves are absorbed by the
    /// worker's redelivery policy and never reach the caller.
    pub async fn deliver(&self, mut message: InboundMessage) -> Result<()> {
        let mut worker = self.pool.acquire().await?;
        debug!(
            worker = worker.id(),
            message = message.id(),
            serialized = self.serialized,
            "dispatching message"
        );

        if self.serialized {
            let disposition = worker.deliver(&mut message).await;
            self.finish(worker, disposition).await;
        } else {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                let disposition = worker.deliver(&mut message).await;
                dispatcher.finish(worker, disposition).await;
            });
        }
        Ok(())
    }

    /// Blocks until every in-flight delivery has completed.
    pub async fn drain(&self) {
        self.pool.drain_and_wait().await;
    }

    /// Stops the pool: pending and future acquisitions fail fast, idle
    /// endpoint leases are released, in-flight deliveries run to completion.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    async fn finish(&self, worker: DeliveryWorker, disposition: WorkerDisposition) {
        match disposition {
            WorkerDisposition::Idle => self.pool.release(worker).await,
            WorkerDisposition::Remove => {
                warn!(worker = worker.id(), "delivery worker invalid, evicting");
                self.pool.remove(worker).await;
            }
        }
    }
}
