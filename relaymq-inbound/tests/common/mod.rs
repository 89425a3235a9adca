//! Shared mock collaborators for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use relaymq_inbound::{
    BrokerError, BrokerErrorKind, BrokerTransactionService, DeliveryOutcome, Endpoint,
    EndpointFactory, InboundConfig, InboundMessage, MessageAcknowledger, PrepareVote, RelayError,
    Result, TransactionBranch, Xid,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn test_config() -> InboundConfig {
    InboundConfig::builder()
        .pool_steady_size(1)
        .pool_max_size(2)
        .redelivery_attempts(2)
        .redelivery_interval(Duration::from_millis(10))
        .endpoint_lease_attempts(3)
        .endpoint_lease_backoff(Duration::from_millis(1))
        .build()
        .expect("test config must be valid")
}

pub fn test_message(id: u64) -> InboundMessage {
    InboundMessage::new(id, "orders", bytes::Bytes::from_static(b"payload"))
}

// ============================================================================
// Recording broker
// ============================================================================

/// One call observed by the [`RecordingBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Start {
        xid: Xid,
        flags: i32,
    },
    End {
        local_txn_id: u64,
        xid: Xid,
        flags: i32,
    },
    Prepare {
        xid: Xid,
    },
    Commit {
        xid: Xid,
        one_phase: bool,
    },
    Rollback {
        xid: Xid,
        max_redeliveries: Option<u32>,
        dead_letter_on_max: bool,
    },
    Recover {
        flags: i32,
    },
}

/// A broker double that records every call and can be scripted to fail.
pub struct RecordingBroker {
    calls: Mutex<Vec<BrokerCall>>,
    next_txn_id: AtomicU64,
    session_id: u64,
    fail_commit: Mutex<Option<BrokerErrorKind>>,
    fail_rollback: Mutex<Option<BrokerErrorKind>>,
}

impl RecordingBroker {
    pub fn new() -> Arc<Self> {
        Self::with_session_id(0)
    }

    pub fn with_session_id(session_id: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            next_txn_id: AtomicU64::new(1000),
            session_id,
            fail_commit: Mutex::new(None),
            fail_rollback: Mutex::new(None),
        })
    }

    pub fn fail_commit_with(&self, kind: BrokerErrorKind) {
        *self.fail_commit.lock().unwrap() = Some(kind);
    }

    pub fn fail_rollback_with(&self, kind: BrokerErrorKind) {
        *self.fail_rollback.lock().unwrap() = Some(kind);
    }

    pub fn calls(&self) -> Vec<BrokerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&BrokerCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    pub fn end_calls(&self) -> usize {
        self.count(|c| matches!(c, BrokerCall::End { .. }))
    }

    pub fn start_calls(&self) -> usize {
        self.count(|c| matches!(c, BrokerCall::Start { .. }))
    }

    pub fn rollback_calls(&self) -> usize {
        self.count(|c| matches!(c, BrokerCall::Rollback { .. }))
    }

    fn record(&self, call: BrokerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BrokerTransactionService for RecordingBroker {
    async fn start_transaction(
        &self,
        _conn_id: u64,
        xid: &Xid,
        flags: i32,
    ) -> std::result::Result<u64, BrokerError> {
        self.record(BrokerCall::Start {
            xid: xid.clone(),
            flags,
        });
        Ok(self.next_txn_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn end_transaction(
        &self,
        _conn_id: u64,
        local_txn_id: u64,
        xid: &Xid,
        flags: i32,
    ) -> std::result::Result<(), BrokerError> {
        self.record(BrokerCall::End {
            local_txn_id,
            xid: xid.clone(),
            flags,
        });
        Ok(())
    }

    async fn prepare_transaction(
        &self,
        _conn_id: u64,
        _local_txn_id: u64,
        xid: &Xid,
    ) -> std::result::Result<PrepareVote, BrokerError> {
        self.record(BrokerCall::Prepare { xid: xid.clone() });
        Ok(PrepareVote::Ok)
    }

    async fn commit_transaction(
        &self,
        _conn_id: u64,
        _local_txn_id: u64,
        xid: &Xid,
        one_phase: bool,
    ) -> std::result::Result<(), BrokerError> {
        self.record(BrokerCall::Commit {
            xid: xid.clone(),
            one_phase,
        });
        if let Some(kind) = *self.fail_commit.lock().unwrap() {
            return Err(BrokerError::new(kind, "scripted commit failure"));
        }
        Ok(())
    }

    async fn rollback_transaction(
        &self,
        _conn_id: u64,
        _local_txn_id: u64,
        xid: &Xid,
        _redeliver_all: bool,
        max_redeliveries: Option<u32>,
        dead_letter_on_max: bool,
    ) -> std::result::Result<(), BrokerError> {
        self.record(BrokerCall::Rollback {
            xid: xid.clone(),
            max_redeliveries,
            dead_letter_on_max,
        });
        if let Some(kind) = *self.fail_rollback.lock().unwrap() {
            return Err(BrokerError::new(kind, "scripted rollback failure"));
        }
        Ok(())
    }

    async fn recover_transactions(
        &self,
        _conn_id: u64,
        flags: i32,
    ) -> std::result::Result<Vec<Xid>, BrokerError> {
        self.record(BrokerCall::Recover { flags });
        Ok(vec![Xid::new(0, b"recovered", b"b1")])
    }

    fn session_id(&self) -> u64 {
        self.session_id
    }
}

// ============================================================================
// Scripted endpoints
// ============================================================================

/// How a scripted endpoint responds to `on_message`.
#[derive(Debug, Clone)]
pub enum EndpointBehavior {
    /// Consume every message.
    Deliver,
    /// Sleep, then consume. Used to hold a worker in flight.
    DeliverSlow(Duration),
    /// Report a retriable failure for the first `n` invocations.
    FailTimes(u32),
    /// Report a retriable failure for every invocation.
    FailAlways,
    /// Report a fatal failure on the first invocation.
    FatalFirst,
    /// Fail the `before_delivery` bracket.
    FailBeforeDelivery,
}

/// Call counters shared between a factory and the endpoints it leases.
#[derive(Debug, Default)]
pub struct EndpointCounters {
    pub leases: AtomicU32,
    pub invocations: AtomicU32,
    pub before_calls: AtomicU32,
    pub after_calls: AtomicU32,
    pub releases: AtomicU32,
}

pub struct ScriptedEndpoint {
    behavior: EndpointBehavior,
    counters: Arc<EndpointCounters>,
    remaining_failures: u32,
}

#[async_trait]
impl Endpoint for ScriptedEndpoint {
    async fn before_delivery(&mut self) -> Result<()> {
        self.counters.before_calls.fetch_add(1, Ordering::SeqCst);
        if matches!(self.behavior, EndpointBehavior::FailBeforeDelivery) {
            return Err(RelayError::Protocol("scripted before-delivery failure".into()));
        }
        Ok(())
    }

    async fn on_message(&mut self, _message: &mut InboundMessage) -> DeliveryOutcome {
        self.counters.invocations.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            EndpointBehavior::Deliver | EndpointBehavior::FailBeforeDelivery => {
                DeliveryOutcome::Delivered
            }
            EndpointBehavior::DeliverSlow(pause) => {
                tokio::time::sleep(*pause).await;
                DeliveryOutcome::Delivered
            }
            EndpointBehavior::FailTimes(_) => {
                if self.remaining_failures > 0 {
                    self.remaining_failures -= 1;
                    DeliveryOutcome::Retry("scripted failure".into())
                } else {
                    DeliveryOutcome::Delivered
                }
            }
            EndpointBehavior::FailAlways => DeliveryOutcome::Retry("scripted failure".into()),
            EndpointBehavior::FatalFirst => DeliveryOutcome::Fatal("scripted fatal failure".into()),
        }
    }

    async fn after_delivery(&mut self) -> Result<()> {
        self.counters.after_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn release(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Endpoint factory double with scriptable lease availability.
pub struct ScriptedFactory {
    behavior: EndpointBehavior,
    transacted: bool,
    unavailable_before: AtomicU32,
    counters: Arc<EndpointCounters>,
}

impl ScriptedFactory {
    pub fn new(behavior: EndpointBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            transacted: true,
            unavailable_before: AtomicU32::new(0),
            counters: Arc::new(EndpointCounters::default()),
        })
    }

    pub fn non_transacted(behavior: EndpointBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            transacted: false,
            unavailable_before: AtomicU32::new(0),
            counters: Arc::new(EndpointCounters::default()),
        })
    }

    /// Makes the first `n` lease attempts fail as transiently unavailable.
    pub fn unavailable(behavior: EndpointBehavior, n: u32) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            transacted: true,
            unavailable_before: AtomicU32::new(n),
            counters: Arc::new(EndpointCounters::default()),
        })
    }

    pub fn counters(&self) -> &Arc<EndpointCounters> {
        &self.counters
    }
}

#[async_trait]
impl EndpointFactory for ScriptedFactory {
    async fn create_endpoint(
        &self,
        _branch: &Arc<TransactionBranch>,
    ) -> Result<Box<dyn Endpoint>> {
        self.counters.leases.fetch_add(1, Ordering::SeqCst);
        let remaining = self.unavailable_before.load(Ordering::SeqCst);
        if remaining > 0 {
            self.unavailable_before.store(remaining - 1, Ordering::SeqCst);
            return Err(RelayError::EndpointUnavailable(
                "scripted lease unavailability".into(),
            ));
        }
        let remaining_failures = match self.behavior {
            EndpointBehavior::FailTimes(n) => n,
            _ => 0,
        };
        Ok(Box::new(ScriptedEndpoint {
            behavior: self.behavior.clone(),
            counters: Arc::clone(&self.counters),
            remaining_failures,
        }))
    }

    fn is_delivery_transacted(&self) -> bool {
        self.transacted
    }
}

// ============================================================================
// Recording acknowledger
// ============================================================================

/// One acknowledgment observed by the [`RecordingAcknowledger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckRecord {
    Acknowledged {
        message: u64,
        delivery_count: u32,
    },
    Undeliverable {
        message: u64,
        dead_letter: bool,
    },
}

#[derive(Default)]
pub struct RecordingAcknowledger {
    records: Mutex<Vec<AckRecord>>,
    fail_next: Mutex<bool>,
}

impl RecordingAcknowledger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `acknowledge` call fail.
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    pub fn records(&self) -> Vec<AckRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageAcknowledger for RecordingAcknowledger {
    async fn acknowledge(
        &self,
        message: &InboundMessage,
        _branch: &Arc<TransactionBranch>,
    ) -> Result<()> {
        let mut fail = self.fail_next.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(RelayError::ResourceManager(
                "scripted acknowledgment failure".into(),
            ));
        }
        self.records.lock().unwrap().push(AckRecord::Acknowledged {
            message: message.id(),
            delivery_count: message.delivery_count(),
        });
        Ok(())
    }

    async fn acknowledge_undeliverable(
        &self,
        message: &InboundMessage,
        _branch: &Arc<TransactionBranch>,
        send_to_dead_letter: bool,
    ) -> Result<()> {
        self.records.lock().unwrap().push(AckRecord::Undeliverable {
            message: message.id(),
            dead_letter: send_to_dead_letter,
        });
        Ok(())
    }
}
