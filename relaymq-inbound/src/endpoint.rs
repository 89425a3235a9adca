//! Application endpoint seams.
//!
//! Endpoints are leased from an application-server-owned
//! [`EndpointFactory`]; each lease is bound to a transaction branch so that
//! transacted deliveries can be bracketed with `before_delivery` /
//! `after_delivery`. Message handling reports its outcome as an explicit
//! [`DeliveryOutcome`] value; the redelivery policy is a pure function of
//! that value, not of any error hierarchy.

use std::sync::Arc;

use async_trait::async_trait;

use relaymq_core::{InboundMessage, Result};

use crate::branch::TransactionBranch;

/// The outcome of handing a message to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The endpoint consumed the message.
    Delivered,
    /// The endpoint failed in a way worth retrying.
    Retry(String),
    /// The endpoint failed in a way that makes further attempts pointless;
    /// the delivery loop aborts without acknowledging the message.
    Fatal(String),
}

impl DeliveryOutcome {
    /// Returns true if the message was consumed.
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// A leased application message endpoint.
#[async_trait]
pub trait Endpoint: Send {
    /// Starts a transacted delivery bracket.
    ///
    /// An error here is fatal for the current delivery: the loop aborts
    /// without acknowledgment.
    async fn before_delivery(&mut self) -> Result<()>;

    /// Hands the message to the application.
    async fn on_message(&mut self, message: &mut InboundMessage) -> DeliveryOutcome;

    /// Closes a transacted delivery bracket, successful or not.
    async fn after_delivery(&mut self) -> Result<()>;

    /// Releases the lease back to the factory.
    async fn release(&mut self);
}

/// Factory for leasing endpoints, owned by the application server.
#[async_trait]
pub trait EndpointFactory: Send + Sync {
    /// Leases an endpoint bound to the given transaction branch.
    ///
    /// May fail transiently with
    /// [`RelayError::EndpointUnavailable`](relaymq_core::RelayError::EndpointUnavailable);
    /// callers retry those with backoff.
    async fn create_endpoint(&self, branch: &Arc<TransactionBranch>) -> Result<Box<dyn Endpoint>>;

    /// Returns true if deliveries through this factory's endpoints run under
    /// a transaction and must be bracketed.
    fn is_delivery_transacted(&self) -> bool;
}
