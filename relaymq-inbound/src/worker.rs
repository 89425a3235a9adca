//! Runs a single message through an application endpoint.
//!
//! Each worker owns one [`TransactionBranch`] and one leased endpoint, and
//! processes at most one message at a time. The delivery loop is the whole
//! redelivery policy: bounded attempts, a configurable pause between
//! attempts, delivery-count propagation onto the message, and a dead-letter
//! or broker-redelivery decision once attempts are exhausted. Delivery
//! failures never escape this loop.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use relaymq_core::{InboundMessage, RelayError};

use crate::acknowledge::MessageAcknowledger;
use crate::branch::TransactionBranch;
use crate::config::InboundConfig;
use crate::endpoint::{DeliveryOutcome, Endpoint, EndpointFactory};

/// Ceiling for the endpoint lease backoff.
const MAX_LEASE_BACKOFF: Duration = Duration::from_secs(5);

/// Which pool path a worker takes after a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerDisposition {
    /// The worker is fit for further deliveries and returns to the idle set.
    Idle,
    /// The worker is invalid and must be evicted from the pool.
    Remove,
}

/// A pooled worker that delivers messages under a transaction branch.
pub struct DeliveryWorker {
    id: u64,
    branch: Arc<TransactionBranch>,
    endpoint: Option<Box<dyn Endpoint>>,
    acknowledger: Arc<dyn MessageAcknowledger>,
    transacted: bool,
    valid: bool,
    redelivery_attempts: u32,
    redelivery_interval: Duration,
    dead_letter_on_exhaustion: bool,
}

/// Applies ±20% jitter so concurrently constructed workers do not hammer the
/// endpoint factory in lockstep.
fn with_jitter(backoff: Duration) -> Duration {
    let factor = 1.0 + rand::thread_rng().gen_range(-0.2..=0.2);
    Duration::from_secs_f64(backoff.as_secs_f64() * factor)
}

impl DeliveryWorker {
    /// Constructs a worker, leasing its endpoint with bounded backoff.
    ///
    /// A worker that cannot lease an endpoint is marked invalid rather than
    /// failing construction; the first message assigned to it is
    /// acknowledged undeliverable and the worker is evicted.
    pub(crate) async fn new(
        id: u64,
        branch: Arc<TransactionBranch>,
        factory: &Arc<dyn EndpointFactory>,
        acknowledger: Arc<dyn MessageAcknowledger>,
        config: &InboundConfig,
    ) -> Self {
        let mut endpoint = None;
        let mut backoff = config.endpoint_lease_backoff();
        let attempts = config.endpoint_lease_attempts();

        for attempt in 1..=attempts {
            match factory.create_endpoint(&branch).await {
                Ok(leased) => {
                    endpoint = Some(leased);
                    break;
                }
                Err(RelayError::EndpointUnavailable(reason)) if attempt < attempts => {
                    info!(
                        worker = id,
                        attempt,
                        reason = %reason,
                        backoff_ms = backoff.as_millis() as u64,
                        "endpoint unavailable, retrying lease"
                    );
                    sleep(with_jitter(backoff)).await;
                    backoff = (backoff * 2).min(MAX_LEASE_BACKOFF);
                }
                Err(err) => {
                    warn!(worker = id, error = %err, "endpoint lease failed");
                    break;
                }
            }
        }

        if endpoint.is_none() {
            info!(
                worker = id,
                "no endpoint could be leased, marking delivery worker invalid"
            );
        }

        let valid = endpoint.is_some();
        Self {
            id,
            branch,
            endpoint,
            acknowledger,
            transacted: factory.is_delivery_transacted(),
            valid,
            redelivery_attempts: config.redelivery_attempts(),
            redelivery_interval: config.redelivery_interval(),
            dead_letter_on_exhaustion: config.dead_letter_on_exhaustion(),
        }
    }

    /// Returns the worker id (shared with its transaction branch).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the transaction branch bound to this worker.
    pub fn branch(&self) -> &Arc<TransactionBranch> {
        &self.branch
    }

    /// Returns true if the worker holds a usable endpoint lease.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Marks the worker invalid, e.g. after a connection failure.
    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Releases the endpoint lease and invalidates the worker.
    pub(crate) async fn release_endpoint(&mut self) {
        if let Some(mut endpoint) = self.endpoint.take() {
            endpoint.release().await;
        }
        self.valid = false;
    }

    /// Delivers one message, retrying per the redelivery policy.
    ///
    /// Returns the pool path the worker takes afterwards. Every outcome of
    /// the message itself (delivered, dead-lettered, returned for broker
    /// redelivery, or abandoned on a fatal bracket failure) is resolved in
    /// here; callers only learn whether the worker survived.
    pub async fn deliver(&mut self, message: &mut InboundMessage) -> WorkerDisposition {
        let endpoint = if self.valid { self.endpoint.take() } else { None };
        let Some(mut endpoint) = endpoint else {
            debug!(
                worker = self.id,
                message = message.id(),
                "invalid worker, acknowledging message undeliverable"
            );
            if let Err(err) = self
                .acknowledger
                .acknowledge_undeliverable(message, &self.branch, self.dead_letter_on_exhaustion)
                .await
            {
                warn!(
                    worker = self.id,
                    message = message.id(),
                    error = %err,
                    "failed to acknowledge undeliverable message"
                );
            }
            return WorkerDisposition::Remove;
        };

        let mut attempts_remaining = self.redelivery_attempts;
        let mut retry_count = 0u32;
        message.set_client_retries(0);
        let mut count = message.delivery_count().saturating_sub(1);

        let mut redeliver = true;
        while redeliver {
            if self.transacted {
                if let Err(err) = endpoint.before_delivery().await {
                    warn!(
                        worker = self.id,
                        message = message.id(),
                        error = %err,
                        "before-delivery failed, abandoning message without acknowledgment"
                    );
                    self.endpoint = Some(endpoint);
                    return WorkerDisposition::Idle;
                }
            }

            count += 1;
            if count > 1 {
                message.update_delivery_count(count);
            }

            match endpoint.on_message(message).await {
                DeliveryOutcome::Delivered => {
                    redeliver = false;
                    match self.acknowledger.acknowledge(message, &self.branch).await {
                        Ok(()) => self.branch.set_rollback_only(None),
                        Err(err) => {
                            warn!(
                                worker = self.id,
                                message = message.id(),
                                error = %err,
                                "acknowledgment failed, marking branch rollback-only"
                            );
                            self.branch.set_rollback_only(Some(err.to_string()));
                        }
                    }
                }
                DeliveryOutcome::Retry(reason) => {
                    retry_count += 1;
                    message.set_client_retries(retry_count);
                    message.set_redelivered(true);
                    message.reset();
                    if attempts_remaining > 1 {
                        attempts_remaining -= 1;
                        debug!(
                            worker = self.id,
                            message = message.id(),
                            reason = %reason,
                            "endpoint failed to consume message, retrying after interval"
                        );
                        sleep(self.redelivery_interval).await;
                    } else {
                        redeliver = false;
                        if self.dead_letter_on_exhaustion {
                            info!(
                                worker = self.id,
                                message = message.id(),
                                "redelivery attempts exhausted, routing message to dead letter"
                            );
                        } else {
                            info!(
                                worker = self.id,
                                message = message.id(),
                                "redelivery attempts exhausted, returning message for broker \
                                 redelivery"
                            );
                        }
                        if let Err(err) = self
                            .acknowledger
                            .acknowledge_undeliverable(
                                message,
                                &self.branch,
                                self.dead_letter_on_exhaustion,
                            )
                            .await
                        {
                            warn!(
                                worker = self.id,
                                message = message.id(),
                                error = %err,
                                "failed to acknowledge undeliverable message"
                            );
                        }
                    }
                }
                DeliveryOutcome::Fatal(reason) => {
                    warn!(
                        worker = self.id,
                        message = message.id(),
                        reason = %reason,
                        "fatal endpoint failure, abandoning message without acknowledgment"
                    );
                    self.endpoint = Some(endpoint);
                    return WorkerDisposition::Idle;
                }
            }

            if self.transacted {
                if let Err(err) = endpoint.after_delivery().await {
                    warn!(
                        worker = self.id,
                        message = message.id(),
                        error = %err,
                        "after-delivery failed, abandoning delivery loop"
                    );
                    redeliver = false;
                }
            }
        }

        self.endpoint = Some(endpoint);
        WorkerDisposition::Idle
    }
}

impl std::fmt::Debug for DeliveryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryWorker")
            .field("id", &self.id)
            .field("valid", &self.valid)
            .field("transacted", &self.transacted)
            .finish()
    }
}
