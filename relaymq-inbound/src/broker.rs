//! The broker-facing transaction service seam.
//!
//! The delivery engine never speaks the broker wire protocol itself; every
//! transaction operation goes through [`BrokerTransactionService`], which a
//! protocol client implements. Failures come back as classified
//! [`BrokerError`]s and are translated into resource-manager errors at the
//! transaction branch boundary.

use async_trait::async_trait;

use relaymq_core::{BrokerError, Xid};

/// The resource manager's vote on the outcome of a prepared transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareVote {
    /// The branch is durably ready to commit.
    Ok,
    /// The branch performed no updates and has already been completed.
    ReadOnly,
}

/// Transaction operations offered by the broker, one connection at a time.
///
/// `conn_id` identifies the physical connection the branch is bound to;
/// `local_txn_id` is the numeric transaction handle the broker assigned on
/// `start_transaction`.
#[async_trait]
pub trait BrokerTransactionService: Send + Sync {
    /// Opens or joins a transaction for the given global id.
    ///
    /// Returns the broker-assigned local transaction id.
    async fn start_transaction(
        &self,
        conn_id: u64,
        xid: &Xid,
        flags: i32,
    ) -> Result<u64, BrokerError>;

    /// Ends the connection's association with the transaction.
    async fn end_transaction(
        &self,
        conn_id: u64,
        local_txn_id: u64,
        xid: &Xid,
        flags: i32,
    ) -> Result<(), BrokerError>;

    /// Makes the transaction durable and returns the broker's vote.
    async fn prepare_transaction(
        &self,
        conn_id: u64,
        local_txn_id: u64,
        xid: &Xid,
    ) -> Result<PrepareVote, BrokerError>;

    /// Commits the transaction, optionally with the one-phase optimization.
    async fn commit_transaction(
        &self,
        conn_id: u64,
        local_txn_id: u64,
        xid: &Xid,
        one_phase: bool,
    ) -> Result<(), BrokerError>;

    /// Rolls back the transaction.
    ///
    /// `redeliver_all` asks the broker to requeue every unacknowledged
    /// message consumed under the transaction. `max_redeliveries` (when set)
    /// bounds broker-side redelivery of those messages, and
    /// `dead_letter_on_max` routes them to the dead-letter destination once
    /// the bound is reached.
    async fn rollback_transaction(
        &self,
        conn_id: u64,
        local_txn_id: u64,
        xid: &Xid,
        redeliver_all: bool,
        max_redeliveries: Option<u32>,
        dead_letter_on_max: bool,
    ) -> Result<(), BrokerError>;

    /// Returns the global ids of all prepared or heuristically completed
    /// transactions known to the broker.
    async fn recover_transactions(&self, conn_id: u64, flags: i32) -> Result<Vec<Xid>, BrokerError>;

    /// Returns the broker session id of the underlying connection.
    ///
    /// Used for same-resource-manager comparison; 0 means unknown and never
    /// compares equal.
    fn session_id(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_vote_equality() {
        assert_eq!(PrepareVote::Ok, PrepareVote::Ok);
        assert_ne!(PrepareVote::Ok, PrepareVote::ReadOnly);
    }

    #[test]
    fn test_trait_is_object_safe() {
        fn assert_object_safe(_: Option<&dyn BrokerTransactionService>) {}
        assert_object_safe(None);
    }
}
