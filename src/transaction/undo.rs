//! Undo records written by running transactions.

use std::fmt;
use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use crate::catalog::{Catalog, CatalogEntryId};
use crate::storage::{DataTable, UpdateNodeId};
use crate::types::{Result, RowId, StratumError};

/// Kind tag of an [`UndoRecord`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum UndoFlags {
    /// A catalog entry was created, altered or dropped.
    CatalogEntry,
    /// Rows were appended to a table.
    InsertTuple,
    /// Rows were marked deleted.
    DeleteTuple,
    /// Column values were updated.
    UpdateTuple,
}

/// Catalog change: `entry` is the version the change superseded.
#[derive(Debug)]
pub struct CatalogUndo {
    pub(crate) catalog: Weak<Catalog>,
    pub(crate) entry: CatalogEntryId,
    pub(crate) alter_payload: Option<Vec<u8>>,
}

impl CatalogUndo {
    pub(crate) fn catalog(&self) -> Result<Arc<Catalog>> {
        self.catalog
            .upgrade()
            .ok_or(StratumError::Closed("catalog dropped"))
    }

    /// Superseded catalog entry.
    pub fn entry(&self) -> CatalogEntryId {
        self.entry
    }

    /// Serialized alter description, present only for alters.
    pub fn alter_payload(&self) -> Option<&[u8]> {
        self.alter_payload.as_deref()
    }
}

/// Rows `[start_row, start_row + count)` appended to a table.
#[derive(Debug)]
pub struct AppendInfo {
    pub(crate) table: Weak<DataTable>,
    /// First appended row.
    pub start_row: RowId,
    /// Number of appended rows.
    pub count: usize,
}

impl AppendInfo {
    pub(crate) fn table(&self) -> Result<Arc<DataTable>> {
        upgrade_table(&self.table)
    }
}

/// Rows of one version chunk marked deleted.
#[derive(Debug)]
pub struct DeleteInfo {
    pub(crate) table: Weak<DataTable>,
    /// Version chunk holding the delete marks.
    pub chunk_index: usize,
    /// First row of the chunk.
    pub base_row: RowId,
    /// Offsets within the chunk, ascending.
    pub rows: SmallVec<[u32; 16]>,
}

impl DeleteInfo {
    pub(crate) fn table(&self) -> Result<Arc<DataTable>> {
        upgrade_table(&self.table)
    }

    /// Number of deleted rows.
    pub fn count(&self) -> usize {
        self.rows.len()
    }
}

/// An update node created in one column.
#[derive(Debug)]
pub struct UpdateRef {
    pub(crate) table: Weak<DataTable>,
    /// Column the node belongs to.
    pub column_index: usize,
    /// Node in the column's update arena.
    pub node: UpdateNodeId,
}

impl UpdateRef {
    pub(crate) fn table(&self) -> Result<Arc<DataTable>> {
        upgrade_table(&self.table)
    }
}

fn upgrade_table(table: &Weak<DataTable>) -> Result<Arc<DataTable>> {
    table.upgrade().ok_or(StratumError::Closed("table dropped"))
}

/// One reversible change made by a transaction.
#[derive(Debug)]
pub enum UndoRecord {
    /// Catalog create, alter or drop.
    CatalogEntry(CatalogUndo),
    /// Table append.
    Insert(AppendInfo),
    /// Row deletion.
    Delete(DeleteInfo),
    /// Column update.
    Update(UpdateRef),
}

impl UndoRecord {
    /// Kind tag of the record.
    pub fn flags(&self) -> UndoFlags {
        match self {
            UndoRecord::CatalogEntry(_) => UndoFlags::CatalogEntry,
            UndoRecord::Insert(_) => UndoFlags::InsertTuple,
            UndoRecord::Delete(_) => UndoFlags::DeleteTuple,
            UndoRecord::Update(_) => UndoFlags::UpdateTuple,
        }
    }
}

/// Append-only log of a transaction's changes, in the order they were made.
#[derive(Debug, Default)]
pub struct UndoBuffer {
    records: Vec<UndoRecord>,
}

impl UndoBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, record: UndoRecord) {
        self.records.push(record);
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in write order.
    pub fn iter(&self) -> std::slice::Iter<'_, UndoRecord> {
        self.records.iter()
    }
}

/// Per-kind record counts visited by one pass over an undo buffer.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PassSummary {
    /// Catalog records.
    pub catalog_entries: usize,
    /// Append records.
    pub inserts: usize,
    /// Delete records.
    pub deletes: usize,
    /// Update records.
    pub updates: usize,
}

impl PassSummary {
    pub(crate) fn record(&mut self, flags: UndoFlags) {
        match flags {
            UndoFlags::CatalogEntry => self.catalog_entries += 1,
            UndoFlags::InsertTuple => self.inserts += 1,
            UndoFlags::DeleteTuple => self.deletes += 1,
            UndoFlags::UpdateTuple => self.updates += 1,
        }
    }

    /// Total records visited.
    pub fn total(&self) -> usize {
        self.catalog_entries + self.inserts + self.deletes + self.updates
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "catalog={} insert={} delete={} update={}",
            self.catalog_entries, self.inserts, self.deletes, self.updates
        )
    }
}
