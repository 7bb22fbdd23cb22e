use tracing::debug;

use super::undo::{PassSummary, UndoBuffer, UndoRecord};
use crate::types::{Result, TxnId};

/// Physically undoes a transaction's changes after its revert pass.
///
/// Records are visited newest first so each change is removed before the
/// ones it was stacked on.
#[derive(Debug)]
pub struct RollbackState {
    transaction_id: TxnId,
}

impl RollbackState {
    /// Prepares a rollback of `transaction_id`.
    pub fn new(transaction_id: TxnId) -> Self {
        Self { transaction_id }
    }

    /// Removes the change described by `record`.
    pub fn rollback_entry(&mut self, record: &UndoRecord) -> Result<()> {
        let txn = self.transaction_id;
        match record {
            UndoRecord::CatalogEntry(undo) => {
                if let Ok(catalog) = undo.catalog() {
                    catalog.undo(undo.entry(), txn)?;
                }
            }
            UndoRecord::Insert(info) => {
                if let Ok(table) = info.table() {
                    table.revert_append(info.start_row)?;
                }
            }
            UndoRecord::Delete(info) => {
                if let Ok(table) = info.table() {
                    table.rollback_delete(info, txn)?;
                }
            }
            UndoRecord::Update(info) => {
                if let Ok(table) = info.table() {
                    table.column(info.column_index)?.rollback_update(info.node)?;
                }
            }
        }
        Ok(())
    }

    /// Rolls back every record of `undo`, newest first.
    pub fn rollback(&mut self, undo: &UndoBuffer) -> Result<PassSummary> {
        let mut summary = PassSummary::default();
        for record in undo.iter().rev() {
            self.rollback_entry(record)?;
            summary.record(record.flags());
        }
        debug!(txn = self.transaction_id, %summary, "txn.rollback");
        Ok(summary)
    }
}
