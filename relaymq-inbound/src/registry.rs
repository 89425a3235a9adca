//! Registry of transaction branches joined under a global transaction id.
//!
//! A transaction manager may enlist several physical connections in one
//! global transaction with `XA_TMJOIN`. The registry is the lookup table
//! that lets any branch find its siblings, both for the join-aware `end`
//! notification rule and for the commit/rollback fan-out that clears every
//! joined branch. It holds no transaction logic of its own.
//!
//! The registry is an explicitly constructed object passed to every branch
//! at construction; one instance per consumer activation (or per process,
//! if the deployment shares transactions across activations).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use relaymq_core::{RelayError, Result, Xid};

use crate::branch::TransactionBranch;

/// Maps a global transaction id to the branches joined under it.
#[derive(Default)]
pub struct BranchRegistry {
    entries: Mutex<HashMap<Xid, Vec<Arc<TransactionBranch>>>>,
}

impl BranchRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a branch under the given global transaction id.
    ///
    /// The first registration creates the entry; later registrations append
    /// (join) to it. Re-registering the same branch is a no-op, so a resumed
    /// or broker-migrated `start` never duplicates an entry.
    pub fn register(&self, xid: &Xid, branch: Arc<TransactionBranch>, is_join: bool) {
        let mut entries = self.entries.lock();
        let joined = entries.entry(xid.clone()).or_default();
        if joined.iter().any(|b| b.id() == branch.id()) {
            return;
        }
        debug!(
            xid = %xid,
            branch = branch.id(),
            join = is_join,
            joined = joined.len() + 1,
            "registered transaction branch"
        );
        joined.push(branch);
    }

    /// Returns the branches joined under the given global transaction id.
    ///
    /// With `err_if_absent` an unknown id is a protocol error; without it an
    /// empty list is returned, which best-effort cleanup paths rely on.
    pub fn branches(&self, xid: &Xid, err_if_absent: bool) -> Result<Vec<Arc<TransactionBranch>>> {
        match self.entries.lock().get(xid) {
            Some(joined) => Ok(joined.clone()),
            None if err_if_absent => Err(RelayError::Protocol(format!(
                "no transaction branches registered for {xid}"
            ))),
            None => Ok(Vec::new()),
        }
    }

    /// Removes the entry for the given global transaction id.
    ///
    /// Returns true if an entry existed.
    pub fn unregister(&self, xid: &Xid) -> bool {
        let removed = self.entries.lock().remove(xid);
        if removed.is_some() {
            debug!(xid = %xid, "unregistered transaction branches");
        }
        removed.is_some()
    }

    /// Returns true if the given global transaction id has an entry.
    pub fn contains(&self, xid: &Xid) -> bool {
        self.entries.lock().contains_key(xid)
    }

    /// Returns the number of registered global transaction ids.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no global transaction is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for BranchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchRegistry")
            .field("transactions", &self.len())
            .finish()
    }
}
