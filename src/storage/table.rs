//! Row-oriented table built from one [`ColumnData`] per column.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::column::{ColumnAppendState, ColumnData, ColumnScanState};
use super::options::StorageOptions;
use super::segment::ColumnSegment;
use super::stats::TableFilter;
use super::vector::{DataChunk, Vector};
use super::version::RowVersions;
use crate::primitives::wal::WriteAheadLog;
use crate::transaction::undo::{AppendInfo, DeleteInfo, UndoRecord, UpdateRef};
use crate::transaction::Transaction;
use crate::types::{
    CommitId, LogicalType, Result, RowId, Snapshot, StratumError, TableId, TxnId, Value,
    PERSISTENT_VERSION,
};

/// Column id that makes a scan emit row ids instead of stored values.
pub const ROW_ID_COLUMN: usize = usize::MAX;

/// Identity and bookkeeping of a table.
#[derive(Debug)]
pub struct DataTableInfo {
    table_id: TableId,
    schema: String,
    table: String,
    temporary: bool,
    cardinality: AtomicU64,
}

impl DataTableInfo {
    /// Creates table identity with zero rows.
    pub fn new(table_id: TableId, schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            table_id,
            schema: schema.into(),
            table: table.into(),
            temporary: false,
            cardinality: AtomicU64::new(0),
        }
    }

    /// Marks the table session-local; its changes are never logged.
    pub fn temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    /// Physical table id.
    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    /// Owning schema.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns true for session-local tables.
    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    /// Estimated number of live rows, counting pending appends and deletes.
    pub fn cardinality(&self) -> u64 {
        self.cardinality.load(Ordering::Acquire)
    }

    fn add_rows(&self, rows: u64) {
        self.cardinality.fetch_add(rows, Ordering::AcqRel);
    }

    fn remove_rows(&self, rows: u64) {
        // Never wraps below zero.
        let _ = self
            .cardinality
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(rows))
            });
    }
}

impl fmt::Display for DataTableInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Cursor of a table scan.
#[derive(Debug, Default)]
pub struct TableScanState {
    column_ids: Vec<usize>,
    filters: Vec<(usize, TableFilter)>,
    columns: Vec<ColumnScanState>,
    row_index: RowId,
    max_row: RowId,
    skipped_segments: usize,
}

impl TableScanState {
    /// Next row the scan will read.
    pub fn row_index(&self) -> RowId {
        self.row_index
    }

    /// Segments skipped because their statistics ruled out every filter match.
    pub fn skipped_segments(&self) -> usize {
        self.skipped_segments
    }

    fn seek(&mut self, row: RowId) {
        self.row_index = row;
        for column in &mut self.columns {
            column.seek(row);
        }
    }
}

/// A table: columns, row versions and the append lease.
#[derive(Debug)]
pub struct DataTable {
    info: DataTableInfo,
    options: Arc<StorageOptions>,
    columns: Vec<ColumnData>,
    versions: RowVersions,
    append_lease: Mutex<Option<TxnId>>,
}

impl DataTable {
    /// Creates an empty table with one column per type.
    pub fn new(
        info: DataTableInfo,
        types: &[LogicalType],
        options: Arc<StorageOptions>,
    ) -> Result<Arc<Self>> {
        if types.is_empty() {
            return Err(StratumError::Invalid("table needs at least one column"));
        }
        options
            .validate()
            .map_err(|_| StratumError::Invalid("invalid storage options"))?;
        let columns = types
            .iter()
            .enumerate()
            .map(|(idx, &ty)| ColumnData::new(idx, ty, Arc::clone(&options)))
            .collect();
        Ok(Arc::new(Self {
            versions: RowVersions::new(options.vector_size),
            info,
            options,
            columns,
            append_lease: Mutex::new(None),
        }))
    }

    /// Identity and cardinality.
    pub fn info(&self) -> &DataTableInfo {
        &self.info
    }

    /// Column types in order.
    pub fn types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(ColumnData::logical_type).collect()
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Column `idx`.
    pub fn column(&self, idx: usize) -> Result<&ColumnData> {
        self.columns
            .get(idx)
            .ok_or(StratumError::Invalid("column index out of range"))
    }

    /// Rows stored, including pending and deleted ones.
    pub fn row_count(&self) -> RowId {
        self.columns[0].total_rows()
    }

    /// Transaction currently holding the append lease.
    pub fn append_lease(&self) -> Option<TxnId> {
        *self.append_lease.lock()
    }

    /// Loads persistent segments, one list per column, as committed data.
    pub fn initialize_persistent(&self, segments: Vec<Vec<ColumnSegment>>) -> Result<()> {
        if segments.len() != self.columns.len() {
            return Err(StratumError::Invalid("segment lists do not match the columns"));
        }
        for (column, list) in self.columns.iter().zip(segments) {
            column.initialize(list)?;
        }
        let rows = self.columns[0].total_rows();
        if self.columns.iter().any(|c| c.total_rows() != rows) {
            return Err(StratumError::Corruption("persistent columns differ in length"));
        }
        self.versions.append(0, rows as usize, PERSISTENT_VERSION);
        self.info.add_rows(rows);
        debug!(table = %self.info, rows, "table.initialize");
        Ok(())
    }

    /// Appends `chunk` as pending rows of `txn`.
    ///
    /// The first append takes the table's append lease, held until the
    /// transaction ends; a second writer gets [`StratumError::Conflict`].
    pub fn append(self: &Arc<Self>, txn: &mut Transaction, chunk: &DataChunk) -> Result<()> {
        if chunk.types() != self.types() {
            return Err(StratumError::Invalid("chunk types do not match the table"));
        }
        let count = chunk.size();
        if count == 0 {
            return Ok(());
        }
        {
            let mut lease = self.append_lease.lock();
            match *lease {
                Some(holder) if holder != txn.id() => {
                    return Err(StratumError::Conflict("table has a concurrent appender"))
                }
                _ => *lease = Some(txn.id()),
            }
        }
        txn.touch(self);
        let start_row = self.row_count();
        for (column, vector) in self.columns.iter().zip(chunk.columns()) {
            if let Err(err) = append_column(column, vector) {
                for column in &self.columns {
                    column.revert_append(start_row)?;
                }
                return Err(err);
            }
        }
        self.versions.append(start_row, count, txn.id());
        self.info.add_rows(count as u64);
        trace!(table = %self.info, txn = txn.id(), start_row, count, "table.append");
        txn.push_undo(UndoRecord::Insert(AppendInfo {
            table: Arc::downgrade(self),
            start_row,
            count,
        }));
        Ok(())
    }

    /// Marks `row_ids` deleted by `txn`; returns how many rows were marked.
    ///
    /// Rows already deleted by `txn` are skipped. On a conflict the rows
    /// marked before it stay recorded for rollback.
    pub fn delete(self: &Arc<Self>, txn: &mut Transaction, row_ids: &[RowId]) -> Result<usize> {
        let mut rows = row_ids.to_vec();
        rows.sort_unstable();
        rows.dedup();
        if rows.last().map_or(false, |&row| row >= self.row_count()) {
            return Err(StratumError::Invalid("delete row outside table"));
        }
        let snapshot = txn.snapshot();
        let mut total = 0;
        let mut cursor = 0;
        while cursor < rows.len() {
            let (chunk_index, _) = self.versions.locate(rows[cursor]);
            let mut offsets = Vec::new();
            while cursor < rows.len() && self.versions.locate(rows[cursor]).0 == chunk_index {
                offsets.push(self.versions.locate(rows[cursor]).1 as u32);
                cursor += 1;
            }
            let (marked, err) = self.versions.delete(snapshot, chunk_index, &offsets);
            if !marked.is_empty() {
                total += marked.len();
                self.info.remove_rows(marked.len() as u64);
                txn.touch(self);
                txn.push_undo(UndoRecord::Delete(DeleteInfo {
                    table: Arc::downgrade(self),
                    chunk_index,
                    base_row: (chunk_index * self.options.vector_size) as RowId,
                    rows: marked,
                }));
            }
            if let Some(err) = err {
                return Err(err);
            }
        }
        trace!(table = %self.info, txn = txn.id(), rows = total, "table.delete");
        Ok(total)
    }

    /// Writes `updates` (one vector per entry of `column_ids`) to `row_ids`
    /// as pending changes of `txn`.
    pub fn update(
        self: &Arc<Self>,
        txn: &mut Transaction,
        column_ids: &[usize],
        updates: &DataChunk,
        row_ids: &[RowId],
    ) -> Result<()> {
        if column_ids.len() != updates.column_count() {
            return Err(StratumError::Invalid("update columns do not match the chunk"));
        }
        let snapshot = txn.snapshot();
        if let Some(&row) = row_ids.iter().find(|&&row| !self.versions.is_visible(snapshot, row)) {
            trace!(table = %self.info, row, "table.update.invisible");
            return Err(StratumError::Conflict("updated row is not visible to the transaction"));
        }
        txn.touch(self);
        for (&column_id, vector) in column_ids.iter().zip(updates.columns()) {
            let column = self.column(column_id)?;
            let nodes = column.update(snapshot, vector, row_ids)?;
            for node in nodes {
                txn.push_undo(UndoRecord::Update(UpdateRef {
                    table: Arc::downgrade(self),
                    column_index: column_id,
                    node,
                }));
            }
        }
        Ok(())
    }

    /// Prepares a scan of `column_ids` whose rows must pass every filter.
    ///
    /// Filters refer to table column indexes; [`ROW_ID_COLUMN`] in
    /// `column_ids` yields row ids.
    pub fn initialize_scan(
        &self,
        state: &mut TableScanState,
        column_ids: Vec<usize>,
        filters: Vec<(usize, TableFilter)>,
    ) -> Result<()> {
        if column_ids
            .iter()
            .chain(filters.iter().map(|(idx, _)| idx))
            .any(|&idx| idx != ROW_ID_COLUMN && idx >= self.columns.len())
        {
            return Err(StratumError::Invalid("scan column out of range"));
        }
        if filters.iter().any(|(idx, _)| *idx == ROW_ID_COLUMN) {
            return Err(StratumError::Invalid("row ids cannot be filtered"));
        }
        state.columns = self
            .columns
            .iter()
            .map(|column| {
                let mut column_state = ColumnScanState::default();
                column.initialize_scan(&mut column_state);
                column_state
            })
            .collect();
        state.column_ids = column_ids;
        state.filters = filters;
        state.row_index = 0;
        state.max_row = self.row_count();
        state.skipped_segments = 0;
        Ok(())
    }

    /// Output types of a scan over `column_ids`.
    pub fn scan_types(&self, column_ids: &[usize]) -> Result<Vec<LogicalType>> {
        column_ids
            .iter()
            .map(|&idx| match idx {
                ROW_ID_COLUMN => Ok(LogicalType::ROW_ID),
                idx => self.column(idx).map(ColumnData::logical_type),
            })
            .collect()
    }

    /// Fills `result` with the next batch of rows visible to `snapshot`.
    ///
    /// Returns the number of rows produced; zero once the scan is done.
    pub fn scan(&self, snapshot: Snapshot, state: &mut TableScanState, result: &mut DataChunk) -> Result<usize> {
        if state.columns.len() != self.columns.len() && state.row_index < state.max_row {
            return Err(StratumError::Invalid("scan state was initialized for another table"));
        }
        let types = self.scan_types(&state.column_ids)?;
        if result.types() != types {
            result.initialize(&types);
        }
        result.reset();
        let vs = self.options.vector_size as RowId;
        while state.row_index < state.max_row {
            let start = state.row_index;
            if let Some(skip_to) = self.zonemap_skip(state)? {
                trace!(table = %self.info, from = start, to = skip_to, "table.scan.skip");
                state.skipped_segments += 1;
                state.seek(skip_to);
                continue;
            }
            let end = (start - start % vs + vs).min(state.max_row);
            let mut sel = self
                .versions
                .select_visible(snapshot, start, (end - start) as usize);
            for (column_id, filter) in &state.filters {
                if sel.is_empty() {
                    break;
                }
                let column = &self.columns[*column_id];
                let column_state = &mut state.columns[*column_id];
                column_state.seek(start);
                let mut values = Vector::new(column.logical_type());
                column.filter_scan(
                    snapshot,
                    column_state,
                    &mut values,
                    &mut sel,
                    std::slice::from_ref(filter),
                )?;
            }
            if sel.is_empty() {
                state.seek(end);
                continue;
            }
            let mut vectors = Vec::with_capacity(state.column_ids.len());
            for &column_id in &state.column_ids {
                if column_id == ROW_ID_COLUMN {
                    vectors.push(Vector::from_row_ids(
                        sel.indices().iter().map(|&idx| start + RowId::from(idx)),
                    ));
                    continue;
                }
                let column = &self.columns[column_id];
                let column_state = &mut state.columns[column_id];
                column_state.seek(start);
                let mut values = Vector::new(column.logical_type());
                column.scan(snapshot, column_state, &mut values)?;
                values.slice(&sel);
                vectors.push(values);
            }
            *result = DataChunk::from_vectors(vectors)?;
            state.seek(end);
            return Ok(result.size());
        }
        Ok(0)
    }

    /// Returns the row to resume at when statistics prove no row of the
    /// segment under the cursor can pass the filters.
    fn zonemap_skip(&self, state: &TableScanState) -> Result<Option<RowId>> {
        for (column_id, filter) in &state.filters {
            let column = &self.columns[*column_id];
            let column_state = &state.columns[*column_id];
            if !column.check_zonemap(column_state, filter) {
                let (_, end) = column
                    .segment_bounds(column_state)
                    .ok_or_else(|| StratumError::Internal("zonemap skipped a missing segment".into()))?;
                return Ok(Some(end.min(state.max_row).max(state.row_index + 1)));
            }
        }
        Ok(None)
    }

    /// Returns row `row_id` projected to `column_ids`, or `None` when the row
    /// is not visible to `snapshot`.
    pub fn fetch_row(
        &self,
        snapshot: Snapshot,
        row_id: RowId,
        column_ids: &[usize],
    ) -> Result<Option<Vec<Value>>> {
        if row_id >= self.row_count() || !self.versions.is_visible(snapshot, row_id) {
            return Ok(None);
        }
        let mut out = Vec::with_capacity(column_ids.len());
        for &column_id in column_ids {
            if column_id == ROW_ID_COLUMN {
                out.push(Value::BigInt(row_id as i64));
                continue;
            }
            let column = self.column(column_id)?;
            let mut vector = Vector::new(column.logical_type());
            column.fetch_row(snapshot, row_id, &mut vector)?;
            out.push(vector.values().first().cloned().unwrap_or(Value::Null));
        }
        Ok(Some(out))
    }

    /// Makes rows `[start_row, start_row + count)` visible from `commit_id` on.
    pub fn commit_append(&self, commit_id: CommitId, start_row: RowId, count: usize) -> Result<()> {
        self.versions.set_inserted(start_row, count, commit_id)
    }

    /// Removes every row at or after `start_row`.
    ///
    /// Removed rows not already counted out by a delete are subtracted from
    /// the cardinality; calling it again for the same or a later row is a
    /// no-op.
    pub fn revert_append(&self, start_row: RowId) -> Result<()> {
        let total = self.row_count();
        if total <= start_row {
            return Ok(());
        }
        let deleted = self.versions.count_deleted(start_row, total) as u64;
        for column in &self.columns {
            column.revert_append(start_row)?;
        }
        self.versions.truncate(start_row);
        let removed = total - start_row;
        self.info.remove_rows(removed - deleted);
        trace!(table = %self.info, start_row, removed, deleted, "table.revert_append");
        Ok(())
    }

    /// Sends rows `[start_row, start_row + count)` to `log`, one vector at a time.
    pub fn write_to_log(&self, log: &mut dyn WriteAheadLog, start_row: RowId, count: usize) -> Result<()> {
        let end = start_row + count as RowId;
        if end > self.row_count() {
            return Err(StratumError::Internal(format!(
                "logged append [{start_row}, {end}) exceeds table {}",
                self.info
            )));
        }
        let vs = self.options.vector_size as RowId;
        let mut cursor = start_row;
        while cursor < end {
            let stop = (cursor - cursor % vs + vs).min(end);
            let mut vectors = Vec::with_capacity(self.columns.len());
            for column in &self.columns {
                let mut values = Vector::new(column.logical_type());
                column.read_base_range(cursor, stop, &mut values)?;
                vectors.push(values);
            }
            log.write_insert(&DataChunk::from_vectors(vectors)?)?;
            cursor = stop;
        }
        Ok(())
    }

    /// Stamps `commit_id` on the delete marks of `info`.
    pub fn commit_delete(&self, info: &DeleteInfo, commit_id: CommitId) -> Result<()> {
        self.versions.set_deleted(info.chunk_index, &info.rows, commit_id)
    }

    /// Restores `txn` into the delete marks of `info` and counts the rows back.
    ///
    /// Rows already removed by a reverted append are skipped; that revert
    /// did not count them out a second time.
    pub fn revert_delete(&self, info: &DeleteInfo, txn: TxnId) -> Result<()> {
        let live = self.live_offsets(info);
        if live.is_empty() {
            return Ok(());
        }
        self.info.add_rows(live.len() as u64);
        self.versions.set_deleted(info.chunk_index, &live, txn)
    }

    /// Clears the delete marks `txn` placed for `info`.
    pub fn rollback_delete(&self, info: &DeleteInfo, txn: TxnId) -> Result<usize> {
        let live = self.live_offsets(info);
        if live.is_empty() {
            return Ok(0);
        }
        self.versions.undo_delete(info.chunk_index, &live, txn)
    }

    fn live_offsets(&self, info: &DeleteInfo) -> Vec<u32> {
        let total = self.row_count();
        info.rows
            .iter()
            .copied()
            .filter(|&offset| info.base_row + RowId::from(offset) < total)
            .collect()
    }

    /// Gives up the append lease if `txn` holds it.
    pub fn release_append(&self, txn: TxnId) {
        let mut lease = self.append_lease.lock();
        if *lease == Some(txn) {
            *lease = None;
        }
    }

    /// Collapses update history no reader at or after `watermark` can see.
    ///
    /// Returns the number of update nodes reclaimed.
    pub fn prune_versions(&self, watermark: CommitId) -> Result<usize> {
        let mut pruned = 0;
        for column in &self.columns {
            pruned += column.prune_updates(watermark)?;
        }
        if pruned > 0 {
            debug!(table = %self.info, watermark, pruned, "table.prune");
        }
        Ok(pruned)
    }
}

fn append_column(column: &ColumnData, vector: &Vector) -> Result<()> {
    let mut state = ColumnAppendState::default();
    column.initialize_append(&mut state)?;
    let mut offset = 0;
    while offset < vector.len() {
        let appended = column.append(&mut state, vector, offset, vector.len() - offset)?;
        if appended == 0 {
            return Err(StratumError::Internal("column append made no progress".into()));
        }
        offset += appended;
    }
    Ok(())
}
