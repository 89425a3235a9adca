//! Transactional concurrent delivery engine for inbound broker messages.
//!
//! This crate is the inbound half of a message-queue resource adapter: it
//! accepts messages produced by a broker client and delivers them, one at a
//! time per worker, to a pool of application endpoints under an XA
//! transaction branch that may be joined across several physical
//! connections.
//!
//! Two pieces carry the real complexity:
//!
//! - [`TransactionBranch`]: the per-connection XA state machine. Branches
//!   joined to the same global transaction coordinate through a
//!   [`BranchRegistry`] so the broker sees exactly one `end` notification and
//!   one commit/rollback fan-out per logical transaction.
//! - [`WorkerPool`] / [`DeliveryWorker`]: bounded concurrent delivery with
//!   exception-driven redelivery, delivery-count tracking, and dead-letter
//!   routing once attempts are exhausted.
//!
//! The broker protocol client, the endpoint container, and the session's
//! acknowledgment path stay behind the [`BrokerTransactionService`],
//! [`EndpointFactory`], and [`MessageAcknowledger`] seams.
//!
//! # Quick Start
//!
//! ```ignore
//! use relaymq_inbound::{
//!     ConsumerCapabilities, InboundConfig, InboundConsumer, SubscriptionMode,
//! };
//!
//! let config = InboundConfig::builder()
//!     .pool_steady_size(2)
//!     .pool_max_size(8)
//!     .redelivery_attempts(3)
//!     .build()?;
//!
//! let mut consumer = InboundConsumer::new(
//!     config,
//!     ConsumerCapabilities::topic(),
//!     connection_id,
//!     broker,          // Arc<dyn BrokerTransactionService>
//!     factory,         // Arc<dyn EndpointFactory>
//!     acknowledger,    // Arc<dyn MessageAcknowledger>
//! )
//! .with_subscription(SubscriptionMode::Durable("audit-log".into()));
//!
//! consumer.activate().await?;
//! // The broker client hands messages to consumer.deliver(message).
//! consumer.deactivate().await;
//! ```

#![warn(missing_docs)]

pub mod acknowledge;
pub mod branch;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod endpoint;
pub mod pool;
pub mod registry;
pub mod worker;

pub use acknowledge::MessageAcknowledger;
pub use branch::{BranchPolicy, BranchState, TransactionBranch};
pub use broker::{BrokerTransactionService, PrepareVote};
pub use config::{ConfigError, InboundConfig, InboundConfigBuilder};
pub use consumer::{ConsumerCapabilities, InboundConsumer, SubscriptionMode};
pub use dispatcher::DeliveryDispatcher;
pub use endpoint::{DeliveryOutcome, Endpoint, EndpointFactory};
pub use pool::WorkerPool;
pub use registry::BranchRegistry;
pub use worker::{DeliveryWorker, WorkerDisposition};

pub use relaymq_core as core;
pub use relaymq_core::{BrokerError, BrokerErrorKind, InboundMessage, RelayError, Result, Xid};
