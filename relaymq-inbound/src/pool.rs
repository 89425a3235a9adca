//! Bounded, growable pool of delivery workers.
//!
//! The pool is created with a steady set of workers and grows on demand up
//! to a configured maximum; the slack beyond the steady size exists only
//! while load needs it and is reclaimed when invalid workers are evicted.
//! Once every worker is busy and the slack is used up, `acquire` parks the
//! caller; since the caller is the broker's delivery task, a full pool is
//! the engine's sole backpressure mechanism.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

use relaymq_core::{RelayError, Result};

use crate::acknowledge::MessageAcknowledger;
use crate::branch::{BranchPolicy, TransactionBranch};
use crate::broker::BrokerTransactionService;
use crate::config::InboundConfig;
use crate::endpoint::EndpointFactory;
use crate::registry::BranchRegistry;
use crate::worker::DeliveryWorker;

#[derive(Debug)]
struct PoolInner {
    idle: VecDeque<DeliveryWorker>,
    total: usize,
    deactivating: bool,
}

/// A bounded pool of [`DeliveryWorker`]s sharing one physical connection.
pub struct WorkerPool {
    config: InboundConfig,
    connection_id: u64,
    broker: Arc<dyn BrokerTransactionService>,
    factory: Arc<dyn EndpointFactory>,
    acknowledger: Arc<dyn MessageAcknowledger>,
    registry: Arc<BranchRegistry>,
    next_worker_id: AtomicU64,
    inner: Mutex<PoolInner>,
    available: Notify,
    drained: Notify,
}

impl WorkerPool {
    /// Creates the pool and pre-constructs the steady set of workers.
    pub async fn new(
        config: InboundConfig,
        connection_id: u64,
        broker: Arc<dyn BrokerTransactionService>,
        factory: Arc<dyn EndpointFactory>,
        acknowledger: Arc<dyn MessageAcknowledger>,
        registry: Arc<BranchRegistry>,
    ) -> Self {
        let pool = Self {
            config,
            connection_id,
            broker,
            factory,
            acknowledger,
            registry,
            next_worker_id: AtomicU64::new(1),
            inner: Mutex::new(PoolInner {
                idle: VecDeque::new(),
                total: 0,
                deactivating: false,
            }),
            available: Notify::new(),
            drained: Notify::new(),
        };

        for _ in 0..pool.config.pool_steady_size() {
            let worker = pool.create_worker().await;
            let mut inner = pool.inner.lock();
            inner.idle.push_back(worker);
            inner.total += 1;
        }

        info!(
            steady = pool.config.pool_steady_size(),
            max = pool.config.pool_max_size(),
            "delivery worker pool ready"
        );
        pool
    }

    /// Takes a worker for one delivery.
    ///
    /// Hands out an idle worker when one exists, lazily constructs a new one
    /// while the pool is below its maximum, and otherwise parks until a
    /// worker is returned. Fails fast with
    /// [`RelayError::PoolClosed`] once the pool has begun deactivating,
    /// including for callers already parked when shutdown arrives.
    pub async fn acquire(&self) -> Result<DeliveryWorker> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let grow = {
                let mut inner = self.inner.lock();
                if inner.deactivating {
                    return Err(RelayError::PoolClosed(
                        "worker pool is deactivating".to_string(),
                    ));
                }
                if let Some(worker) = inner.idle.pop_front() {
                    return Ok(worker);
                }
                if inner.total < self.config.pool_max_size() {
                    inner.total += 1;
                    true
                } else {
                    false
                }
            };

            if grow {
                debug!(max = self.config.pool_max_size(), "growing worker pool");
                return Ok(self.create_worker().await);
            }

            notified.await;
        }
    }

    /// Returns a worker to the idle set and wakes one parked acquirer.
    ///
    /// A worker returned after shutdown has begun is not re-pooled; its
    /// endpoint lease is released and the slot disappears.
    pub async fn release(&self, worker: DeliveryWorker) {
        let leftover = {
            let mut inner = self.inner.lock();
            if inner.deactivating {
                inner.total -= 1;
                Some(worker)
            } else {
                inner.idle.push_back(worker);
                None
            }
        };
        if let Some(mut worker) = leftover {
            worker.release_endpoint().await;
        }
        self.available.notify_one();
        self.drained.notify_waiters();
    }

    /// Permanently evicts a worker, reclaiming its slot for future growth.
    pub async fn remove(&self, mut worker: DeliveryWorker) {
        debug!(worker = worker.id(), "evicting delivery worker");
        worker.release_endpoint().await;
        {
            let mut inner = self.inner.lock();
            inner.total -= 1;
        }
        // A parked acquirer may now grow the pool into the reclaimed slot.
        self.available.notify_one();
        self.drained.notify_waiters();
    }

    /// Blocks until every in-flight worker has been returned.
    pub async fn drain_and_wait(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock();
                if inner.idle.len() == inner.total {
                    return;
                }
            }

            notified.await;
        }
    }

    /// Marks the pool deactivating, releases every idle endpoint lease, and
    /// wakes all parked acquirers so they fail fast.
    ///
    /// In-flight deliveries are not interrupted; their workers release on
    /// return. Use [`drain_and_wait`](Self::drain_and_wait) first for an
    /// orderly stop.
    pub async fn shutdown(&self) {
        let idle = {
            let mut inner = self.inner.lock();
            inner.deactivating = true;
            let drained: Vec<DeliveryWorker> = inner.idle.drain(..).collect();
            inner.total -= drained.len();
            drained
        };
        info!(released = idle.len(), "shutting down delivery worker pool");
        for mut worker in idle {
            worker.release_endpoint().await;
        }
        self.available.notify_waiters();
        self.drained.notify_waiters();
    }

    /// Marks every idle worker invalid, e.g. after a connection failure.
    ///
    /// Invalid workers are evicted the next time they are asked to deliver.
    pub fn invalidate_idle(&self) {
        let mut inner = self.inner.lock();
        for worker in inner.idle.iter_mut() {
            worker.invalidate();
        }
    }

    /// Returns the number of workers currently in existence.
    pub fn total(&self) -> usize {
        self.inner.lock().total
    }

    /// Returns the number of idle workers.
    pub fn idle_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    /// Returns true once shutdown has begun.
    pub fn is_deactivating(&self) -> bool {
        self.inner.lock().deactivating
    }

    async fn create_worker(&self) -> DeliveryWorker {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let branch = TransactionBranch::new(
            id,
            self.connection_id,
            Arc::clone(&self.broker),
            Arc::clone(&self.registry),
            BranchPolicy::from(&self.config),
        );
        DeliveryWorker::new(
            id,
            branch,
            &self.factory,
            Arc::clone(&self.acknowledger),
            &self.config,
        )
        .await
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("WorkerPool")
            .field("total", &inner.total)
            .field("idle", &inner.idle.len())
            .field("deactivating", &inner.deactivating)
            .field("max", &self.config.pool_max_size())
            .finish()
    }
}
