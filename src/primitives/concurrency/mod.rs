#![forbid(unsafe_code)]

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::types::TxnId;

/// Process-wide lock serializing commit and abort passes.
///
/// Only one transaction may walk its undo buffer at a time; commit ids are
/// reserved while the lock is held so id order matches log order.
#[derive(Clone, Default)]
pub struct CommitLock {
    gate: Arc<Mutex<()>>,
}

/// Guard representing a held commit lock.
pub struct CommitGuard<'a> {
    _gate: MutexGuard<'a, ()>,
}

impl CommitLock {
    /// Creates an unheld lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock is free; `txn` is recorded in the trace.
    pub fn acquire(&self, txn: TxnId) -> CommitGuard<'_> {
        let gate = self.gate.lock();
        trace!(txn, "commit_lock.acquire");
        CommitGuard { _gate: gate }
    }
}
