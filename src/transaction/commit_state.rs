use tracing::{debug, trace};

use super::undo::{DeleteInfo, PassSummary, UndoBuffer, UndoFlags, UndoRecord, UpdateRef};
use crate::catalog::{AlterInfo, CatalogEntry, CatalogObject, CatalogType};
use crate::primitives::wal::WriteAheadLog;
use crate::storage::{DataChunk, DataTable, DataTableInfo, SelectionVector, Vector};
use crate::types::{CommitId, LogicalType, Result, StratumError, TableId, TxnId, Value};

/// Walks an undo buffer to commit or revert every record.
///
/// The commit pass stamps `commit_id` on each change and, when a log is
/// attached, writes it through; the revert pass puts `transaction_id` back.
pub struct CommitState<'a> {
    log: Option<&'a mut dyn WriteAheadLog>,
    commit_id: CommitId,
    transaction_id: TxnId,
    current_table: Option<TableId>,
    delete_chunk: Option<DataChunk>,
    update_chunk: Option<DataChunk>,
}

fn sink<'s, 'a>(
    log: &'s mut Option<&'a mut dyn WriteAheadLog>,
) -> Result<&'s mut (dyn WriteAheadLog + 'a)> {
    log.as_deref_mut()
        .ok_or(StratumError::Invalid("commit requested logging without a log"))
}

impl<'a> CommitState<'a> {
    /// Prepares a pass for `transaction_id` committing at `commit_id`.
    pub fn new(
        commit_id: CommitId,
        transaction_id: TxnId,
        log: Option<&'a mut dyn WriteAheadLog>,
    ) -> Self {
        Self {
            log,
            commit_id,
            transaction_id,
            current_table: None,
            delete_chunk: None,
            update_chunk: None,
        }
    }

    /// Commit id stamped by this pass.
    pub fn commit_id(&self) -> CommitId {
        self.commit_id
    }

    /// Emits a table marker when `info` differs from the table of the
    /// previous row record.
    pub fn switch_table(&mut self, info: &DataTableInfo, op: UndoFlags) -> Result<()> {
        if self.current_table == Some(info.table_id()) {
            return Ok(());
        }
        sink(&mut self.log)?.write_set_table(info.schema(), info.table())?;
        self.current_table = Some(info.table_id());
        trace!(table = %info, ?op, "commit.switch_table");
        Ok(())
    }

    /// Logs the catalog change that replaced `entry` with `parent`.
    ///
    /// The parent's kind decides the record: a parent of the same kind as
    /// the entry is an alter, a tombstone parent is a drop, anything else is
    /// the original create.
    pub fn write_catalog_entry(
        &mut self,
        entry: &CatalogEntry,
        parent: &CatalogEntry,
        payload: Option<&[u8]>,
    ) -> Result<()> {
        if entry.temporary() || parent.temporary() {
            return Ok(());
        }
        if parent.catalog_type().is_derived() || parent.catalog_type() == CatalogType::PreparedStatement {
            return Ok(());
        }
        let log = sink(&mut self.log)?;
        match (parent.object(), entry.object()) {
            (CatalogObject::Table(_), CatalogObject::Table(_))
            | (CatalogObject::View(_), CatalogObject::View(_)) => {
                let info = decode_alter(payload)?;
                commit_alter(&info, entry.object(), parent.object())?;
                log.write_alter(&info)
            }
            (CatalogObject::Table(def), _) => log.write_create_table(def),
            (CatalogObject::View(def), _) => log.write_create_view(def),
            (CatalogObject::Schema(_), CatalogObject::Schema(_)) => Ok(()),
            (CatalogObject::Schema(def), _) => log.write_create_schema(def),
            (CatalogObject::Sequence(def), _) => log.write_create_sequence(def),
            (CatalogObject::Macro(def), _) => log.write_create_macro(def),
            (CatalogObject::Deleted { .. }, dropped) => match dropped {
                CatalogObject::Table(def) => log.write_drop_table(def),
                CatalogObject::Schema(def) => log.write_drop_schema(def),
                CatalogObject::View(def) => log.write_drop_view(def),
                CatalogObject::Sequence(def) => log.write_drop_sequence(def),
                CatalogObject::Macro(def) => log.write_drop_macro(def),
                CatalogObject::PreparedStatement { .. } => Ok(()),
                other => Err(StratumError::Internal(format!(
                    "no drop record for catalog kind {:?}",
                    other.catalog_type()
                ))),
            },
            (other, _) => Err(StratumError::Internal(format!(
                "no log record for catalog kind {:?}",
                other.catalog_type()
            ))),
        }
    }

    /// Logs the row ids of `info`, reusing one scratch chunk across calls.
    pub fn write_delete(&mut self, table: &DataTable, info: &DeleteInfo) -> Result<()> {
        self.switch_table(table.info(), UndoFlags::DeleteTuple)?;
        let chunk = self
            .delete_chunk
            .get_or_insert_with(|| DataChunk::new(&[LogicalType::ROW_ID]));
        chunk.reset();
        let rows = chunk.column_mut(0);
        for &offset in &info.rows {
            rows.push_unchecked(Value::BigInt((info.base_row + u64::from(offset)) as i64));
        }
        sink(&mut self.log)?.write_delete(chunk)
    }

    /// Logs the committed values `info` overwrote, paired with their row ids.
    pub fn write_update(&mut self, table: &DataTable, info: &UpdateRef) -> Result<()> {
        self.switch_table(table.info(), UndoFlags::UpdateTuple)?;
        let column = table.column(info.column_index)?;
        let mut values = Vector::new(column.logical_type());
        let (vector_start, tuples) = column.fetch_committed(info.node, &mut values)?;
        let types = [column.logical_type(), LogicalType::ROW_ID];
        let chunk = self.update_chunk.get_or_insert_with(DataChunk::default);
        if chunk.types() != types {
            chunk.initialize(&types);
        }
        let row_ids = Vector::from_row_ids(vector_start..vector_start + values.len() as u64);
        *chunk.column_mut(0) = values;
        *chunk.column_mut(1) = row_ids;
        chunk.slice(&SelectionVector::from_indices(tuples.to_vec()));
        sink(&mut self.log)?.write_update(chunk, info.column_index)
    }

    /// Commits one record, logging it first when `has_log` is set.
    pub fn commit_entry(&mut self, record: &UndoRecord, has_log: bool) -> Result<()> {
        match record {
            UndoRecord::CatalogEntry(undo) => {
                let catalog = undo.catalog()?;
                let entry = catalog.entry(undo.entry())?;
                let parent = catalog.parent_of(undo.entry())?;
                catalog.update_timestamp(parent.id(), self.commit_id, self.transaction_id)?;
                if entry.name() != parent.name() {
                    catalog.update_timestamp(entry.id(), self.commit_id, self.transaction_id)?;
                }
                if has_log {
                    self.write_catalog_entry(&entry, &parent, undo.alter_payload())?;
                }
            }
            UndoRecord::Insert(info) => {
                let table = info.table()?;
                if has_log && !table.info().is_temporary() {
                    self.switch_table(table.info(), UndoFlags::InsertTuple)?;
                    table.write_to_log(sink(&mut self.log)?, info.start_row, info.count)?;
                }
                table.commit_append(self.commit_id, info.start_row, info.count)?;
            }
            UndoRecord::Delete(info) => {
                let table = info.table()?;
                if has_log && !table.info().is_temporary() {
                    self.write_delete(&table, info)?;
                }
                table.commit_delete(info, self.commit_id)?;
            }
            UndoRecord::Update(info) => {
                let table = info.table()?;
                if has_log && !table.info().is_temporary() {
                    self.write_update(&table, info)?;
                }
                table.column(info.column_index)?.commit_update(info.node, self.commit_id)?;
            }
        }
        Ok(())
    }

    /// Undoes the effects of [`CommitState::commit_entry`] on one record.
    ///
    /// Records whose table or catalog is gone have nothing left to restore.
    pub fn revert_commit(&mut self, record: &UndoRecord) -> Result<()> {
        let txn = self.transaction_id;
        match record {
            UndoRecord::CatalogEntry(undo) => {
                let Ok(catalog) = undo.catalog() else {
                    return Ok(());
                };
                let entry = catalog.entry(undo.entry())?;
                let parent = catalog.parent_of(undo.entry())?;
                catalog.update_timestamp(parent.id(), txn, txn)?;
                if entry.name() != parent.name() {
                    catalog.update_timestamp(entry.id(), txn, txn)?;
                }
            }
            UndoRecord::Insert(info) => {
                if let Ok(table) = info.table() {
                    table.revert_append(info.start_row)?;
                }
            }
            UndoRecord::Delete(info) => {
                if let Ok(table) = info.table() {
                    table.revert_delete(info, txn)?;
                }
            }
            UndoRecord::Update(info) => {
                if let Ok(table) = info.table() {
                    table.column(info.column_index)?.revert_update(info.node, txn)?;
                }
            }
        }
        Ok(())
    }

    /// Commits every record of `undo` in write order.
    pub fn commit_pass(&mut self, undo: &UndoBuffer, has_log: bool) -> Result<PassSummary> {
        let mut summary = PassSummary::default();
        for record in undo.iter() {
            self.commit_entry(record, has_log)?;
            summary.record(record.flags());
        }
        debug!(
            txn = self.transaction_id,
            commit_id = self.commit_id,
            %summary,
            "commit.pass"
        );
        Ok(summary)
    }

    /// Reverts every record of `undo` in write order.
    pub fn revert_pass(&mut self, undo: &UndoBuffer) -> Result<PassSummary> {
        let mut summary = PassSummary::default();
        for record in undo.iter() {
            self.revert_commit(record)?;
            summary.record(record.flags());
        }
        debug!(txn = self.transaction_id, %summary, "commit.revert");
        Ok(summary)
    }
}

fn decode_alter(payload: Option<&[u8]>) -> Result<AlterInfo> {
    let payload = payload
        .ok_or_else(|| StratumError::Internal("catalog alter without an alter payload".into()))?;
    AlterInfo::decode(payload)
}

/// Checks that replaying `info` on `old` reproduces `new`.
fn commit_alter(info: &AlterInfo, old: &CatalogObject, new: &CatalogObject) -> Result<()> {
    let replayed = info
        .apply(old)
        .map_err(|err| StratumError::Internal(format!("alter payload does not apply: {err}")))?;
    if &replayed != new {
        return Err(StratumError::Internal(format!(
            "alter payload does not reproduce {}.{}",
            new.schema(),
            new.name()
        )));
    }
    Ok(())
}
