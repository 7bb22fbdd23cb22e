//! Transactions, their undo buffers and the passes that finish them.

mod commit_state;
mod commit_table;
mod manager;
mod rollback;
pub mod undo;

pub use commit_state::CommitState;
pub use commit_table::{CommitReader, CommitTable};
pub use manager::{TransactionManager, TransactionStats};
pub use rollback::RollbackState;
pub use undo::{PassSummary, UndoBuffer, UndoFlags, UndoRecord};

use std::sync::{Arc, Weak};

use crate::storage::DataTable;
use crate::types::{CommitId, Snapshot, TxnId};

/// A running transaction.
///
/// Owned by the caller between [`TransactionManager::begin`] and either
/// [`TransactionManager::commit`] or [`TransactionManager::rollback`].
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    start_time: CommitId,
    reader: Option<CommitReader>,
    undo: UndoBuffer,
    tables: Vec<Weak<DataTable>>,
}

impl Transaction {
    pub(crate) fn new(id: TxnId, start_time: CommitId) -> Self {
        Self {
            id,
            start_time,
            reader: None,
            undo: UndoBuffer::new(),
            tables: Vec::new(),
        }
    }

    /// Transaction id stamped on pending changes.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Newest commit visible to the transaction.
    pub fn start_time(&self) -> CommitId {
        self.start_time
    }

    /// View the transaction reads with.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(self.start_time, self.id)
    }

    /// Changes recorded so far.
    pub fn undo(&self) -> &UndoBuffer {
        &self.undo
    }

    /// Returns true when the transaction changed nothing.
    pub fn is_read_only(&self) -> bool {
        self.undo.is_empty()
    }

    pub(crate) fn push_undo(&mut self, record: UndoRecord) {
        self.undo.push(record);
    }

    /// Remembers `table` so its append lease and update history are handled
    /// when the transaction ends.
    pub(crate) fn touch(&mut self, table: &Arc<DataTable>) {
        let seen = self
            .tables
            .iter()
            .any(|known| std::ptr::eq(known.as_ptr(), Arc::as_ptr(table)));
        if !seen {
            self.tables.push(Arc::downgrade(table));
        }
    }

    pub(crate) fn touched_tables(&self) -> impl Iterator<Item = Arc<DataTable>> + '_ {
        self.tables.iter().filter_map(Weak::upgrade)
    }

    pub(crate) fn set_reader(&mut self, reader: CommitReader) {
        self.reader = Some(reader);
    }

    pub(crate) fn take_reader(&mut self) -> Option<CommitReader> {
        self.reader.take()
    }
}
