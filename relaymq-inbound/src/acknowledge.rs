//! Message acknowledgment seam.

use std::sync::Arc;

use async_trait::async_trait;

use relaymq_core::{InboundMessage, Result};

use crate::branch::TransactionBranch;

/// Acknowledges delivered messages through the consumer's session.
///
/// Acknowledgments are attributed to the worker's transaction branch so the
/// broker can tie the consumption to the branch's global transaction.
#[async_trait]
pub trait MessageAcknowledger: Send + Sync {
    /// Acknowledges a successfully delivered message.
    async fn acknowledge(
        &self,
        message: &InboundMessage,
        branch: &Arc<TransactionBranch>,
    ) -> Result<()>;

    /// Acknowledges a message that could not be delivered.
    ///
    /// With `send_to_dead_letter` the broker routes the message to the
    /// dead-letter destination; otherwise it stays subject to broker-side
    /// redelivery.
    async fn acknowledge_undeliverable(
        &self,
        message: &InboundMessage,
        branch: &Arc<TransactionBranch>,
        send_to_dead_letter: bool,
    ) -> Result<()>;
}
