//! Drives the delivery engine end to end with in-memory collaborators.
//!
//! Run with: `cargo run --example inline_delivery`

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use relaymq_inbound::{
    BrokerError, BrokerTransactionService, ConsumerCapabilities, DeliveryOutcome, Endpoint,
    EndpointFactory, InboundConfig, InboundConsumer, InboundMessage, MessageAcknowledger,
    PrepareVote, Result, TransactionBranch, Xid,
};

/// A broker that assigns transaction ids and accepts everything.
struct DemoBroker {
    next_txn_id: AtomicU64,
}

#[async_trait]
impl BrokerTransactionService for DemoBroker {
    async fn start_transaction(
        &self,
        _conn_id: u64,
        _xid: &Xid,
        _flags: i32,
    ) -> std::result::Result<u64, BrokerError> {
        Ok(self.next_txn_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn end_transaction(
        &self,
        _conn_id: u64,
        _local_txn_id: u64,
        _xid: &Xid,
        _flags: i32,
    ) -> std::result::Result<(), BrokerError> {
        Ok(())
    }

    async fn prepare_transaction(
        &self,
        _conn_id: u64,
        _local_txn_id: u64,
        _xid: &Xid,
    ) -> std::result::Result<PrepareVote, BrokerError> {
        Ok(PrepareVote::Ok)
    }

    async fn commit_transaction(
        &self,
        _conn_id: u64,
        _local_txn_id: u64,
        _xid: &Xid,
        _one_phase: bool,
    ) -> std::result::Result<(), BrokerError> {
        Ok(())
    }

    async fn rollback_transaction(
        &self,
        _conn_id: u64,
        _local_txn_id: u64,
        _xid: &Xid,
        _redeliver_all: bool,
        _max_redeliveries: Option<u32>,
        _dead_letter_on_max: bool,
    ) -> std::result::Result<(), BrokerError> {
        Ok(())
    }

    async fn recover_transactions(
        &self,
        _conn_id: u64,
        _flags: i32,
    ) -> std::result::Result<Vec<Xid>, BrokerError> {
        Ok(Vec::new())
    }

    fn session_id(&self) -> u64 {
        1
    }
}

/// An endpoint that rejects the first attempt for every odd message id.
struct FlakyEndpoint {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl Endpoint for FlakyEndpoint {
    async fn before_delivery(&mut self) -> Result<()> {
        Ok(())
    }

    async fn on_message(&mut self, message: &mut InboundMessage) -> DeliveryOutcome {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if message.id() % 2 == 1 && !message.redelivered() {
            println!(
                "endpoint: rejecting message {} on attempt {attempt}",
                message.id()
            );
            return DeliveryOutcome::Retry("odd messages fail once".to_string());
        }
        println!(
            "endpoint: consumed message {} ({} bytes, delivery count {})",
            message.id(),
            message.remaining(),
            message.delivery_count()
        );
        DeliveryOutcome::Delivered
    }

    async fn after_delivery(&mut self) -> Result<()> {
        Ok(())
    }

    async fn release(&mut self) {}
}

struct FlakyEndpointFactory {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl EndpointFactory for FlakyEndpointFactory {
    async fn create_endpoint(&self, _branch: &Arc<TransactionBranch>) -> Result<Box<dyn Endpoint>> {
        Ok(Box::new(FlakyEndpoint {
            attempts: Arc::clone(&self.attempts),
        }))
    }

    fn is_delivery_transacted(&self) -> bool {
        true
    }
}

struct PrintingAcknowledger;

#[async_trait]
impl MessageAcknowledger for PrintingAcknowledger {
    async fn acknowledge(
        &self,
        message: &InboundMessage,
        branch: &Arc<TransactionBranch>,
    ) -> Result<()> {
        println!(
            "acknowledged message {} through branch {}",
            message.id(),
            branch.id()
        );
        Ok(())
    }

    async fn acknowledge_undeliverable(
        &self,
        message: &InboundMessage,
        _branch: &Arc<TransactionBranch>,
        send_to_dead_letter: bool,
    ) -> Result<()> {
        println!(
            "message {} undeliverable (dead letter: {send_to_dead_letter})",
            message.id()
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = InboundConfig::builder()
        .pool_steady_size(2)
        .pool_max_size(4)
        .redelivery_attempts(3)
        .redelivery_interval(Duration::from_millis(50))
        .build()?;

    let mut consumer = InboundConsumer::new(
        config,
        ConsumerCapabilities::queue(),
        1,
        Arc::new(DemoBroker {
            next_txn_id: AtomicU64::new(1),
        }),
        Arc::new(FlakyEndpointFactory {
            attempts: Arc::new(AtomicU32::new(0)),
        }),
        Arc::new(PrintingAcknowledger),
    );
    consumer.activate().await?;

    for id in 1..=4 {
        let message = InboundMessage::new(id, "orders", Bytes::from_static(b"demo payload"));
        consumer.deliver(message).await?;
    }

    consumer.deactivate().await;
    Ok(())
}
