use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::commit_state::CommitState;
use super::commit_table::CommitTable;
use super::rollback::RollbackState;
use super::Transaction;
use crate::primitives::concurrency::CommitLock;
use crate::primitives::wal::WriteAheadLog;
use crate::storage::StorageOptions;
use crate::types::{CommitId, Result, Snapshot, StratumError, TxnId, TRANSACTION_ID_START};

/// Counters describing transaction outcomes since startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransactionStats {
    /// Transactions that committed at least one change.
    pub commits: u64,
    /// Transactions that committed without changes.
    pub read_only_commits: u64,
    /// Commit passes that failed and were reverted.
    pub failed_commits: u64,
    /// Explicit rollbacks.
    pub rollbacks: u64,
    /// Transactions begun but not yet finished.
    pub active: usize,
    /// Newest commit id.
    pub last_commit: CommitId,
    /// Oldest commit id a running transaction may read at.
    pub oldest_visible: CommitId,
}

struct ManagerState {
    commit_table: CommitTable,
    next_txn_id: TxnId,
    last_commit: CommitId,
}

#[derive(Default)]
struct Counters {
    commits: AtomicU64,
    read_only_commits: AtomicU64,
    failed_commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// Hands out transactions and serializes their commit and abort passes.
pub struct TransactionManager {
    options: Arc<StorageOptions>,
    commit_lock: CommitLock,
    state: Mutex<ManagerState>,
    counters: Counters,
}

/// Shortens the borrow of an optional log for one pass.
fn reborrow<'s>(log: &'s mut Option<&mut dyn WriteAheadLog>) -> Option<&'s mut dyn WriteAheadLog> {
    match log {
        Some(log) => {
            let log: &mut dyn WriteAheadLog = &mut **log;
            Some(log)
        }
        None => None,
    }
}

impl TransactionManager {
    /// Creates a manager for a database with no commits yet.
    pub fn new(options: Arc<StorageOptions>) -> Self {
        Self {
            options,
            commit_lock: CommitLock::new(),
            state: Mutex::new(ManagerState {
                commit_table: CommitTable::new(0),
                next_txn_id: TRANSACTION_ID_START,
                last_commit: 0,
            }),
            counters: Counters::default(),
        }
    }

    /// Options shared with the tables of this database.
    pub fn options(&self) -> &Arc<StorageOptions> {
        &self.options
    }

    /// Starts a transaction reading at the newest commit.
    pub fn begin(&self) -> Result<Transaction> {
        let mut state = self.state.lock();
        let id = state.next_txn_id;
        if id == u64::MAX {
            return Err(StratumError::Invalid("transaction id space exhausted"));
        }
        let start_time = state.last_commit;
        let reader = state.commit_table.register_reader(start_time)?;
        state.next_txn_id += 1;
        drop(state);
        let mut txn = Transaction::new(id, start_time);
        txn.set_reader(reader);
        debug!(txn = id, start_time, "txn.begin");
        Ok(txn)
    }

    /// Snapshot of everything committed so far, for reads outside a transaction.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::committed(self.last_commit())
    }

    /// Newest commit id.
    pub fn last_commit(&self) -> CommitId {
        self.state.lock().last_commit
    }

    /// Oldest commit id a running transaction may still read at.
    pub fn oldest_visible(&self) -> CommitId {
        self.state.lock().commit_table.oldest_visible()
    }

    /// Commits `txn`, writing its changes through `log` when one is given.
    ///
    /// Returns the commit id, or `None` for a transaction that changed
    /// nothing. On failure every change of `txn` is reverted and rolled back
    /// before the error is returned.
    pub fn commit(
        &self,
        mut txn: Transaction,
        log: Option<&mut dyn WriteAheadLog>,
    ) -> Result<Option<CommitId>> {
        let _guard = self.commit_lock.acquire(txn.id());
        if txn.is_read_only() {
            self.finish(&mut txn);
            self.counters.read_only_commits.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        let commit_id = {
            let mut state = self.state.lock();
            let id = state.last_commit + 1;
            if let Err(err) = state.commit_table.reserve(id) {
                drop(state);
                self.abort(&mut txn);
                return Err(err);
            }
            id
        };
        let has_log = log.is_some();
        let mut log = log;
        let mut pass = CommitState::new(commit_id, txn.id(), reborrow(&mut log));
        let outcome = pass.commit_pass(txn.undo(), has_log);
        drop(pass);
        let outcome = outcome.and_then(|summary| {
            if let Some(log) = log.as_deref_mut() {
                log.flush()?;
            }
            Ok(summary)
        });

        match outcome {
            Ok(summary) => {
                let watermark = {
                    let mut state = self.state.lock();
                    state.commit_table.mark_committed(commit_id)?;
                    state.last_commit = commit_id;
                    if let Some(reader) = txn.take_reader() {
                        state.commit_table.release_reader(reader);
                    }
                    state.commit_table.oldest_visible()
                };
                self.release_tables(&txn);
                if self.options.prune_on_commit {
                    for table in txn.touched_tables() {
                        table.prune_versions(watermark)?;
                    }
                }
                self.counters.commits.fetch_add(1, Ordering::Relaxed);
                debug!(txn = txn.id(), commit_id, %summary, "txn.commit");
                Ok(Some(commit_id))
            }
            Err(err) => {
                warn!(txn = txn.id(), commit_id, error = %err, "txn.commit_failed");
                self.abort(&mut txn);
                if let Err(abandon) = self.state.lock().commit_table.abandon(commit_id) {
                    warn!(commit_id, error = %abandon, "txn.abandon_failed");
                }
                self.counters.failed_commits.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Discards every change of `txn`.
    pub fn rollback(&self, mut txn: Transaction) -> Result<()> {
        let _guard = self.commit_lock.acquire(txn.id());
        let result = Self::undo_all(&txn);
        self.finish(&mut txn);
        self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Outcome counters and reader state.
    pub fn stats(&self) -> TransactionStats {
        let state = self.state.lock();
        TransactionStats {
            commits: self.counters.commits.load(Ordering::Relaxed),
            read_only_commits: self.counters.read_only_commits.load(Ordering::Relaxed),
            failed_commits: self.counters.failed_commits.load(Ordering::Relaxed),
            rollbacks: self.counters.rollbacks.load(Ordering::Relaxed),
            active: state.commit_table.active_readers(),
            last_commit: state.last_commit,
            oldest_visible: state.commit_table.oldest_visible(),
        }
    }

    /// Reverts then rolls back `txn` and releases what it holds.
    fn abort(&self, txn: &mut Transaction) {
        if let Err(err) = Self::undo_all(txn) {
            warn!(txn = txn.id(), error = %err, "txn.abort_failed");
        }
        self.finish(txn);
    }

    fn undo_all(txn: &Transaction) -> Result<()> {
        let reverted = CommitState::new(0, txn.id(), None).revert_pass(txn.undo());
        let rolled_back = RollbackState::new(txn.id()).rollback(txn.undo());
        reverted?;
        rolled_back?;
        Ok(())
    }

    fn finish(&self, txn: &mut Transaction) {
        if let Some(reader) = txn.take_reader() {
            self.state.lock().commit_table.release_reader(reader);
        }
        self.release_tables(txn);
    }

    fn release_tables(&self, txn: &Transaction) {
        for table in txn.touched_tables() {
            table.release_append(txn.id());
        }
    }
}
