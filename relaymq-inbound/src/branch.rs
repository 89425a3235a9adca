//! The per-connection XA transaction branch state machine.
//!
//! A [`TransactionBranch`] wraps one physical broker connection's share of a
//! global transaction. It is created once per delivery worker and reused
//! across many transactions: `start` binds it to a global transaction id,
//! `end`/`commit`/`rollback`/`forget` eventually return it to the cleared
//! state. Branches joined to the same global transaction find each other
//! through the [`BranchRegistry`](crate::registry::BranchRegistry), which is
//! how the engine guarantees that the broker sees exactly one `end` and one
//! commit/rollback fan-out per logical transaction no matter how many
//! connections were enlisted.

use std::sync::Arc;

use parking_lot::Mutex as StateMutex;
use tokio::sync::Mutex as TransitionMutex;
use tracing::{debug, warn};

use relaymq_core::{xid as xa, RelayError, Result, Xid};

use crate::broker::{BrokerTransactionService, PrepareVote};
use crate::config::InboundConfig;
use crate::registry::BranchRegistry;

// ============================================================================
// Branch state
// ============================================================================

/// The state of a transaction branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    /// No active transaction. The initial state, re-entered after
    /// commit/rollback/forget.
    Created,
    /// `start` has been called; work is being attributed to this branch.
    Started,
    /// `end` was called with the suspend flag; the branch is temporarily
    /// disassociated and resumable.
    Incomplete,
    /// `end` was called with the fail flag; the branch's work is defective.
    Failed,
    /// `end` was called with neither suspend nor fail; the branch's portion
    /// of work is done.
    Complete,
    /// `prepare` succeeded; the branch is durably ready to commit.
    Prepared,
}

impl BranchState {
    /// Returns true if `start` is legal in this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Created | Self::Incomplete)
    }

    /// Returns true if `end` is legal in this state.
    pub fn can_end(&self) -> bool {
        matches!(self, Self::Started)
    }

    /// Returns true if `prepare` is legal in this state.
    pub fn can_prepare(&self) -> bool {
        matches!(self, Self::Started | Self::Complete)
    }

    /// Returns true if a commit with the given phase count is legal in this
    /// state.
    pub fn can_commit(&self, one_phase: bool) -> bool {
        if one_phase {
            matches!(self, Self::Complete)
        } else {
            matches!(self, Self::Prepared)
        }
    }
}

// ============================================================================
// Branch policy
// ============================================================================

/// The configuration slice a branch needs for its broker interactions.
#[derive(Debug, Clone)]
pub struct BranchPolicy {
    /// Forward every `end` to the broker regardless of sibling branch state
    /// (legacy compatibility behavior).
    pub notify_end_always: bool,
    /// Broker-side redelivery bound applied by compensating rollbacks.
    pub max_redeliveries: Option<u32>,
    /// Route messages to the dead-letter destination when the redelivery
    /// bound is reached.
    pub dead_letter_on_max: bool,
    /// Allow same-resource-manager comparison by broker session id.
    pub same_rm_allowed: bool,
}

impl Default for BranchPolicy {
    fn default() -> Self {
        Self {
            notify_end_always: false,
            max_redeliveries: None,
            dead_letter_on_max: false,
            same_rm_allowed: false,
        }
    }
}

impl From<&InboundConfig> for BranchPolicy {
    fn from(config: &InboundConfig) -> Self {
        Self {
            notify_end_always: config.notify_end_always(),
            max_redeliveries: Some(config.redelivery_attempts()),
            dead_letter_on_max: config.dead_letter_on_exhaustion(),
            same_rm_allowed: config.same_rm_allowed(),
        }
    }
}

// ============================================================================
// Transaction branch
// ============================================================================

/// Local transaction id, global transaction id, and state move together.
///
/// Invariant: `local_txn_id == 0 ⇔ xid == None ⇔ state == Created` is only
/// broken transiently inside this module's own critical sections.
#[derive(Debug)]
struct BranchInner {
    state: BranchState,
    local_txn_id: u64,
    xid: Option<Xid>,
    rollback_only: Option<String>,
}

/// One physical connection's share of a global transaction.
///
/// All transitions on a branch are mutually exclusive; fan-out operations
/// that finish sibling branches snapshot the joined set and then call each
/// sibling's independently synchronized clear, so no lock spans every
/// branch.
pub struct TransactionBranch {
    id: u64,
    connection_id: u64,
    broker: Arc<dyn BrokerTransactionService>,
    registry: Arc<BranchRegistry>,
    policy: BranchPolicy,
    transition: TransitionMutex<()>,
    inner: StateMutex<BranchInner>,
}

impl TransactionBranch {
    /// Creates a cleared branch bound to one physical connection.
    pub fn new(
        id: u64,
        connection_id: u64,
        broker: Arc<dyn BrokerTransactionService>,
        registry: Arc<BranchRegistry>,
        policy: BranchPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            connection_id,
            broker,
            registry,
            policy,
            transition: TransitionMutex::new(()),
            inner: StateMutex::new(BranchInner {
                state: BranchState::Created,
                local_txn_id: 0,
                xid: None,
                rollback_only: None,
            }),
        })
    }

    /// Returns the branch id (shared with its delivery worker).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the owning connection id.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Returns the current branch state.
    pub fn state(&self) -> BranchState {
        self.inner.lock().state
    }

    /// Returns the broker-assigned local transaction id, 0 when cleared.
    pub fn local_txn_id(&self) -> u64 {
        self.inner.lock().local_txn_id
    }

    /// Returns the bound global transaction id, if any.
    pub fn current_xid(&self) -> Option<Xid> {
        self.inner.lock().xid.clone()
    }

    /// Returns true if this branch's portion of work is done.
    pub fn is_complete(&self) -> bool {
        self.inner.lock().state == BranchState::Complete
    }

    /// Marks or unmarks the branch rollback-only.
    ///
    /// Set by the delivery worker when an acknowledgment fails mid
    /// transaction; a marked branch refuses to prepare or one-phase commit
    /// and surfaces the recorded cause instead.
    pub fn set_rollback_only(&self, cause: Option<String>) {
        self.inner.lock().rollback_only = cause;
    }

    /// Starts work on behalf of the given global transaction.
    ///
    /// Resuming a suspended branch reattaches locally without a broker
    /// round-trip (unless the legacy notify-always mode is on). Any other
    /// start asks the broker to open or join the transaction and adopts the
    /// returned local transaction id; a binding that disagrees with what the
    /// branch already holds is logged and replaced, which reconciles
    /// broker-side transaction migration.
    pub async fn start(self: &Arc<Self>, xid: &Xid, flags: i32) -> Result<()> {
        let _transition = self.transition.lock().await;
        debug!(
            branch = self.id,
            xid = %xid,
            flags = %xa::format_flags(flags),
            "start"
        );

        {
            let inner = self.inner.lock();
            if !inner.state.can_start() {
                return Err(RelayError::Protocol(format!(
                    "cannot start branch {} in state {:?}",
                    self.id, inner.state
                )));
            }
        }

        if xa::is_resume(flags) && !self.policy.notify_end_always {
            // The broker kept the suspended association; only reattach.
            self.inner.lock().state = BranchState::Started;
            return Ok(());
        }

        let local_txn_id = self
            .broker
            .start_transaction(self.connection_id, xid, flags)
            .await
            .map_err(|err| {
                RelayError::ResourceManager(format!("start failed for {xid}: {err}"))
            })?;

        {
            let mut inner = self.inner.lock();
            let rebound = inner.local_txn_id != 0
                && (inner.local_txn_id != local_txn_id || inner.xid.as_ref() != Some(xid));
            if rebound {
                warn!(
                    branch = self.id,
                    old_txn = inner.local_txn_id,
                    new_txn = local_txn_id,
                    xid = %xid,
                    "transaction binding changed by broker, adopting new pair"
                );
            }
            inner.local_txn_id = local_txn_id;
            inner.xid = Some(xid.clone());
            inner.state = BranchState::Started;
        }

        self.registry
            .register(xid, Arc::clone(self), xa::is_join(flags));
        Ok(())
    }

    /// Ends work on behalf of the given global transaction.
    ///
    /// The branch state moves to `Failed`, `Incomplete`, or `Complete`
    /// depending on the flags. The broker is notified only when the flags
    /// indicate failure, or when they indicate success and every branch
    /// joined under the transaction is complete; a premature `end` while a
    /// sibling still has outstanding work confuses some transaction
    /// managers. Suspension never notifies; the association simply detaches
    /// until resumed.
    pub async fn end(&self, xid: &Xid, flags: i32) -> Result<()> {
        let _transition = self.transition.lock().await;
        debug!(
            branch = self.id,
            xid = %xid,
            flags = %xa::format_flags(flags),
            "end"
        );

        let (local_txn_id, next) = {
            let mut inner = self.inner.lock();
            if !inner.state.can_end() {
                return Err(RelayError::Protocol(format!(
                    "cannot end branch {} in state {:?}",
                    self.id, inner.state
                )));
            }
            inner.state = if xa::is_fail(flags) {
                BranchState::Failed
            } else if xa::is_suspend(flags) {
                BranchState::Incomplete
            } else {
                BranchState::Complete
            };
            (inner.local_txn_id, inner.state)
        };

        if self.policy.notify_end_always {
            return self.send_end(local_txn_id, xid, flags).await;
        }

        match next {
            BranchState::Failed => self.send_end(local_txn_id, xid, flags).await,
            BranchState::Complete => {
                let joined = self.registry.branches(xid, true)?;
                if joined.iter().all(|branch| branch.is_complete()) {
                    self.send_end(local_txn_id, xid, flags).await
                } else {
                    debug!(
                        branch = self.id,
                        xid = %xid,
                        "sibling branches still incomplete, deferring broker end"
                    );
                    Ok(())
                }
            }
            // Suspended: the association detaches, to be resumed later.
            _ => Ok(()),
        }
    }

    async fn send_end(&self, local_txn_id: u64, xid: &Xid, flags: i32) -> Result<()> {
        self.broker
            .end_transaction(self.connection_id, local_txn_id, xid, flags)
            .await
            .map_err(|err| RelayError::ResourceManager(format!("end failed for {xid}: {err}")))
    }

    /// Asks the broker to make the branch durable and returns its vote.
    pub async fn prepare(&self, xid: &Xid) -> Result<PrepareVote> {
        let _transition = self.transition.lock().await;
        debug!(branch = self.id, xid = %xid, "prepare");

        let local_txn_id = {
            let inner = self.inner.lock();
            if let Some(cause) = &inner.rollback_only {
                return Err(RelayError::ResourceManager(format!(
                    "branch {} is marked rollback-only: {cause}",
                    self.id
                )));
            }
            if !inner.state.can_prepare() {
                return Err(RelayError::Protocol(format!(
                    "cannot prepare branch {} in state {:?}",
                    self.id, inner.state
                )));
            }
            inner.local_txn_id
        };

        let vote = self
            .broker
            .prepare_transaction(self.connection_id, local_txn_id, xid)
            .await
            .map_err(|err| {
                RelayError::ResourceManager(format!("prepare failed for {xid}: {err}"))
            })?;

        self.inner.lock().state = BranchState::Prepared;
        Ok(vote)
    }

    /// Commits the global transaction.
    ///
    /// On success every branch joined to the transaction is cleared and the
    /// registry entry removed. A failed one-phase commit (for a transaction
    /// the broker still knows) triggers exactly one compensating rollback
    /// under the configured redelivery policy and is reported as a
    /// rollback-class error, so the transaction manager learns the true
    /// outcome rather than a generic resource-manager failure.
    pub async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<()> {
        let _transition = self.transition.lock().await;
        debug!(branch = self.id, xid = %xid, one_phase, "commit");

        let local_txn_id = {
            let inner = self.inner.lock();
            if one_phase {
                if let Some(cause) = &inner.rollback_only {
                    return Err(RelayError::ResourceManager(format!(
                        "branch {} is marked rollback-only: {cause}",
                        self.id
                    )));
                }
            }
            if !inner.state.can_commit(one_phase) {
                return Err(RelayError::Protocol(format!(
                    "cannot {}commit branch {} in state {:?}",
                    if one_phase { "one-phase " } else { "" },
                    self.id,
                    inner.state
                )));
            }
            inner.local_txn_id
        };

        let commit_error = match self
            .broker
            .commit_transaction(self.connection_id, local_txn_id, xid, one_phase)
            .await
        {
            Ok(()) => None,
            Err(err) => Some(err),
        };

        let Some(err) = commit_error else {
            self.finish_joined(xid);
            return Ok(());
        };

        if err.is_not_found() {
            // Nothing left broker-side to compensate for.
            self.finish_joined(xid);
            return Err(RelayError::AlreadyRolledBack(format!(
                "commit failed for {xid}, transaction no longer known to the broker: {err}"
            )));
        }

        if !one_phase {
            self.finish_joined(xid);
            return Err(RelayError::ResourceManager(format!(
                "commit failed for {xid}: {err}"
            )));
        }

        warn!(
            branch = self.id,
            xid = %xid,
            error = %err,
            "one-phase commit failed, rolling back transaction"
        );
        match self
            .rollback_with_policy(
                xid,
                self.policy.max_redeliveries,
                self.policy.dead_letter_on_max,
            )
            .await
        {
            Ok(()) => Err(RelayError::RolledBack(format!(
                "one-phase commit failed for {xid}, transaction rolled back: {err}"
            ))),
            Err(rollback_err) => Err(RelayError::ResourceManager(format!(
                "one-phase commit failed for {xid} and rollback also failed \
                 ({rollback_err}): {err}"
            ))),
        }
    }

    /// Rolls back the global transaction.
    ///
    /// The joined branches are cleared and the registry entry removed even
    /// when the broker rollback call fails, so a broken connection never
    /// leaks registry entries.
    pub async fn rollback(&self, xid: &Xid) -> Result<()> {
        let _transition = self.transition.lock().await;
        debug!(branch = self.id, xid = %xid, "rollback");
        self.rollback_with_policy(xid, None, false).await
    }

    /// Broker rollback plus joined-branch cleanup. Caller holds the
    /// transition lock.
    async fn rollback_with_policy(
        &self,
        xid: &Xid,
        max_redeliveries: Option<u32>,
        dead_letter_on_max: bool,
    ) -> Result<()> {
        let local_txn_id = self.inner.lock().local_txn_id;
        let result = self
            .broker
            .rollback_transaction(
                self.connection_id,
                local_txn_id,
                xid,
                true,
                max_redeliveries,
                dead_letter_on_max,
            )
            .await;

        // Cleanup runs whether or not the broker call succeeded.
        self.finish_joined(xid);

        result.map_err(|err| {
            RelayError::ResourceManager(format!("rollback failed for {xid}: {err}"))
        })
    }

    /// Forgets a heuristically completed transaction.
    ///
    /// Unregisters the global transaction id and clears local state if it
    /// matches this branch's current binding.
    pub async fn forget(&self, xid: &Xid) -> Result<()> {
        let _transition = self.transition.lock().await;
        debug!(branch = self.id, xid = %xid, "forget");

        self.registry.unregister(xid);
        let matches_binding = self.inner.lock().xid.as_ref() == Some(xid);
        if matches_binding {
            self.clear_transaction_state();
        }
        Ok(())
    }

    /// Returns the global ids of all prepared or heuristically completed
    /// transactions known to the broker.
    ///
    /// Stateless: this branch's own state is not affected.
    pub async fn recover(&self, flags: i32) -> Result<Vec<Xid>> {
        self.broker
            .recover_transactions(self.connection_id, flags)
            .await
            .map_err(|err| RelayError::ResourceManager(format!("recover failed: {err}")))
    }

    /// Returns true if this branch and `other` front the same resource
    /// manager instance.
    ///
    /// Gated by the same-resource-manager comparison policy; when allowed,
    /// two branches match if their connections carry the same non-zero
    /// broker session id.
    pub fn is_same_rm(&self, other: &TransactionBranch) -> bool {
        if !self.policy.same_rm_allowed {
            return false;
        }
        let session = self.broker.session_id();
        session != 0 && session == other.broker.session_id()
    }

    /// Clears the transaction binding, returning the branch to `Created`.
    ///
    /// Independently synchronized so that commit/rollback fan-out can clear
    /// sibling branches without holding any lock of its own across the call.
    pub(crate) fn clear_transaction_state(&self) {
        let mut inner = self.inner.lock();
        inner.state = BranchState::Created;
        inner.local_txn_id = 0;
        inner.xid = None;
    }

    /// Clears every branch joined under `xid` and drops the registry entry.
    /// Absence is tolerated: cleanup paths run best-effort.
    fn finish_joined(&self, xid: &Xid) {
        if let Ok(joined) = self.registry.branches(xid, false) {
            for branch in joined {
                branch.clear_transaction_state();
            }
        }
        self.registry.unregister(xid);
    }
}

impl std::fmt::Debug for TransactionBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TransactionBranch")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id)
            .field("state", &inner.state)
            .field("local_txn_id", &inner.local_txn_id)
            .field("xid", &inner.xid)
            .finish()
    }
}
