//! Row-oriented access to one column's segments and update overlays.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::options::StorageOptions;
use super::segment::{ColumnSegment, ColumnSegmentType};
use super::segment_tree::{SegmentNode, SegmentTree};
use super::stats::{BaseStatistics, FilterPropagateResult, TableFilter};
use super::update::{UpdateNodeId, UpdateStore};
use super::vector::{SelectionVector, Vector};
use crate::types::{CommitId, LogicalType, Result, RowId, Snapshot, StratumError, TxnId, Value};

/// Cursor of a scan over one column.
#[derive(Clone, Debug, Default)]
pub struct ColumnScanState {
    row_index: RowId,
    max_row: RowId,
    initialized: bool,
}

impl ColumnScanState {
    /// Next row the scan will read.
    pub fn row_index(&self) -> RowId {
        self.row_index
    }

    /// Row count captured when the scan was initialized.
    pub fn max_row(&self) -> RowId {
        self.max_row
    }

    /// Moves the cursor to `row`.
    pub fn seek(&mut self, row: RowId) {
        self.row_index = row;
    }

    /// Returns true once every row has been read.
    pub fn is_exhausted(&self) -> bool {
        self.row_index >= self.max_row
    }
}

/// Append cursor pointing at the transient tail segment.
#[derive(Clone, Debug, Default)]
pub struct ColumnAppendState {
    segment_index: Option<usize>,
}

/// Storage for a single column of a table.
#[derive(Debug)]
pub struct ColumnData {
    column_index: usize,
    logical_type: LogicalType,
    options: Arc<StorageOptions>,
    data: RwLock<SegmentTree<ColumnSegment>>,
    updates: RwLock<UpdateStore>,
    persistent_rows: AtomicU64,
    statistics: Mutex<BaseStatistics>,
}

impl ColumnData {
    /// Creates an empty column.
    pub fn new(column_index: usize, logical_type: LogicalType, options: Arc<StorageOptions>) -> Self {
        let updates = UpdateStore::new(logical_type, options.vector_size, options.segment_capacity());
        Self {
            column_index,
            logical_type,
            options,
            data: RwLock::new(SegmentTree::new()),
            updates: RwLock::new(updates),
            persistent_rows: AtomicU64::new(0),
            statistics: Mutex::new(BaseStatistics::empty(logical_type)),
        }
    }

    /// Position of the column in its table.
    pub fn column_index(&self) -> usize {
        self.column_index
    }

    /// Type of the values stored.
    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    /// Rows loaded from persistent segments at initialization.
    pub fn persistent_rows(&self) -> RowId {
        self.persistent_rows.load(Ordering::Acquire)
    }

    /// Rows currently stored, committed or not.
    pub fn total_rows(&self) -> RowId {
        self.data.read().total_rows()
    }

    /// Number of base segments.
    pub fn segment_count(&self) -> usize {
        self.data.read().len()
    }

    /// Storage class of every base segment, in row order.
    pub fn segment_types(&self) -> Vec<ColumnSegmentType> {
        self.data.read().iter().map(ColumnSegment::segment_type).collect()
    }

    /// Row range `[start, end)` of every base segment, in row order.
    pub fn segment_ranges(&self) -> Vec<(RowId, RowId)> {
        self.data
            .read()
            .iter()
            .map(|segment| (segment.start(), segment.end()))
            .collect()
    }

    /// Number of live update nodes.
    pub fn update_node_count(&self) -> usize {
        self.updates.read().live_nodes()
    }

    /// Installs persistent segments into an empty column.
    pub fn initialize(&self, segments: Vec<ColumnSegment>) -> Result<()> {
        let mut tree = self.data.write();
        if !tree.is_empty() {
            return Err(StratumError::Invalid("column already holds segments"));
        }
        if segments.iter().any(|s| s.logical_type() != self.logical_type) {
            return Err(StratumError::Invalid("segment type does not match column"));
        }
        if segments.first().map_or(false, |s| s.start() != 0) {
            return Err(StratumError::Invalid("first segment must start at row 0"));
        }
        let loaded = SegmentTree::from_nodes(segments)?;
        let mut stats = self.statistics.lock();
        for segment in loaded.iter() {
            stats.merge(segment.stats());
        }
        self.persistent_rows.store(loaded.total_rows(), Ordering::Release);
        debug!(
            column = self.column_index,
            segments = loaded.len(),
            rows = loaded.total_rows(),
            "column.initialize"
        );
        *tree = loaded;
        Ok(())
    }

    /// Positions `state` at the first row.
    pub fn initialize_scan(&self, state: &mut ColumnScanState) {
        let tree = self.data.read();
        state.row_index = tree.base_row().unwrap_or(0);
        state.max_row = tree.total_rows();
        state.initialized = true;
    }

    /// Positions `state` at the first row of vector `vector_index`.
    pub fn initialize_scan_with_offset(&self, state: &mut ColumnScanState, vector_index: usize) {
        self.initialize_scan(state);
        state.row_index = (vector_index * self.options.vector_size) as u64;
    }

    /// Reads the next vector of rows visible to `snapshot` into `result`.
    ///
    /// Runs stop at vector boundaries, so every column of a table yields the
    /// same row ranges. Returns the number of rows read; zero once exhausted.
    pub fn scan(&self, snapshot: Snapshot, state: &mut ColumnScanState, result: &mut Vector) -> Result<usize> {
        let Some((start, end)) = self.next_range(state)? else {
            result.clear();
            return Ok(0);
        };
        self.read_base_range(start, end, result)?;
        self.updates.read().fetch_updates(snapshot, start, result);
        state.row_index = end;
        Ok((end - start) as usize)
    }

    /// Reads the selected rows of the next vector and narrows `sel` to the
    /// rows passing every filter.
    ///
    /// `sel` holds offsets relative to the vector start. On return `result`
    /// holds one value per surviving offset and the survivor count is
    /// returned.
    pub fn filter_scan(
        &self,
        snapshot: Snapshot,
        state: &mut ColumnScanState,
        result: &mut Vector,
        sel: &mut SelectionVector,
        filters: &[TableFilter],
    ) -> Result<usize> {
        result.clear();
        let Some((start, end)) = self.next_range(state)? else {
            *sel = SelectionVector::default();
            return Ok(0);
        };
        let count = (end - start) as usize;
        sel.retain(|idx| (idx as usize) < count);
        let mut selected = Vector::with_capacity(self.logical_type, sel.len());
        {
            let tree = self.data.read();
            let updates = self.updates.read();
            for &idx in sel.indices() {
                let row = start + u64::from(idx);
                let value = match updates.fetch_row(snapshot, row) {
                    Some(value) => value,
                    None => {
                        let segment = tree
                            .find(row)
                            .and_then(|i| tree.get(i))
                            .ok_or(StratumError::Invalid("row outside column"))?;
                        segment.value(row)?
                    }
                };
                selected.push_unchecked(value);
            }
        }
        let mut kept = Vec::with_capacity(sel.len());
        for (pos, &idx) in sel.indices().iter().enumerate() {
            let value = &selected.values()[pos];
            if filters.iter().all(|filter| filter.matches(value)) {
                kept.push(idx);
                result.push_unchecked(value.clone());
            }
        }
        *sel = SelectionVector::from_indices(kept);
        state.row_index = end;
        trace!(column = self.column_index, start, survivors = sel.len(), "column.filter_scan");
        Ok(sel.len())
    }

    /// Returns false only when no row of the segment under the cursor can
    /// satisfy `filter`, counting both base values and every update written
    /// into that range.
    pub fn check_zonemap(&self, state: &ColumnScanState, filter: &TableFilter) -> bool {
        let tree = self.data.read();
        let Some(segment) = tree.find(state.row_index).and_then(|idx| tree.get(idx)) else {
            return true;
        };
        if segment.stats().check_filter(filter) != FilterPropagateResult::AlwaysFalse {
            return true;
        }
        match self.updates.read().stats_overlapping(segment.start(), segment.end()) {
            Some(stats) => stats.check_filter(filter) != FilterPropagateResult::AlwaysFalse,
            None => false,
        }
    }

    /// Row range of the base segment under the cursor.
    pub fn segment_bounds(&self, state: &ColumnScanState) -> Option<(RowId, RowId)> {
        let tree = self.data.read();
        let segment = tree.find(state.row_index).and_then(|idx| tree.get(idx))?;
        Some((segment.start(), segment.end()))
    }

    /// Reads the next vector with the newest committed values, ignoring snapshots.
    ///
    /// Unless `allow_pending_updates` is set, fails with
    /// [`StratumError::Uncommitted`] when an update covering one of the rows
    /// is not yet visible to every snapshot, i.e. is pending or committed
    /// after `watermark`.
    pub fn index_scan(
        &self,
        state: &mut ColumnScanState,
        result: &mut Vector,
        watermark: CommitId,
        allow_pending_updates: bool,
    ) -> Result<usize> {
        let Some((start, end)) = self.next_range(state)? else {
            result.clear();
            return Ok(0);
        };
        self.read_base_range(start, end, result)?;
        self.updates
            .read()
            .fetch_committed_updates(start, result, watermark, allow_pending_updates)?;
        state.row_index = end;
        Ok((end - start) as usize)
    }

    /// Prepares the transient tail segment appends go into.
    ///
    /// A persistent tail with spare room is converted into a transient
    /// segment; a full persistent tail gets a fresh transient successor.
    pub fn initialize_append(&self, state: &mut ColumnAppendState) -> Result<()> {
        let mut tree = self.data.write();
        let tail_type = tree.last().map(|s| (s.segment_type(), s.is_full()));
        match tail_type {
            None => {
                tree.append(ColumnSegment::transient(
                    self.logical_type,
                    0,
                    self.options.segment_capacity(),
                ))?;
            }
            Some((ColumnSegmentType::Persistent, true)) => {
                let start = tree.total_rows();
                self.push_transient(&mut tree, start)?;
            }
            Some((ColumnSegmentType::Persistent, false)) => {
                let tail = tree
                    .pop()
                    .ok_or_else(|| StratumError::Internal("segment tail vanished".into()))?;
                tree.append(tail.into_transient())?;
            }
            Some((ColumnSegmentType::Transient, _)) => {}
        }
        state.segment_index = Some(tree.len() - 1);
        Ok(())
    }

    /// Appends up to `count` values of `vector` starting at `offset`.
    ///
    /// Returns how many rows were stored; when the tail fills up a new
    /// transient segment is opened and the caller loops for the rest.
    pub fn append(
        &self,
        state: &mut ColumnAppendState,
        vector: &Vector,
        offset: usize,
        count: usize,
    ) -> Result<usize> {
        if vector.logical_type() != self.logical_type {
            return Err(StratumError::Invalid("vector type does not match column"));
        }
        let mut tree = self.data.write();
        let mut idx = state
            .segment_index
            .ok_or(StratumError::Invalid("append state not initialized"))?;
        if idx + 1 != tree.len() {
            idx = tree.len().saturating_sub(1);
        }
        let tail_full = tree.get(idx).map_or(true, ColumnSegment::is_full);
        if tail_full {
            let start = tree.total_rows();
            self.push_transient(&mut tree, start)?;
            idx = tree.len() - 1;
        }
        state.segment_index = Some(idx);
        let segment = tree
            .get_mut(idx)
            .ok_or_else(|| StratumError::Internal("append segment missing".into()))?;
        let appended = segment.append(vector, offset, count)?;
        drop(tree);
        let stats = BaseStatistics::from_values(
            self.logical_type,
            &vector.values()[offset..offset + appended],
        );
        self.merge_statistics(&stats);
        Ok(appended)
    }

    fn push_transient(&self, tree: &mut SegmentTree<ColumnSegment>, start: RowId) -> Result<()> {
        trace!(column = self.column_index, start, "column.segment.transient");
        tree.append(ColumnSegment::transient(
            self.logical_type,
            start,
            self.options.segment_capacity(),
        ))
    }

    /// Removes every row at or after `start_row`; a no-op when nothing is there.
    pub fn revert_append(&self, start_row: RowId) -> Result<()> {
        let mut tree = self.data.write();
        if tree.total_rows() <= start_row {
            return Ok(());
        }
        if start_row < self.persistent_rows() {
            return Err(StratumError::Invalid("cannot revert persistent rows"));
        }
        let idx = tree
            .find(start_row)
            .ok_or(StratumError::Invalid("revert start outside column"))?;
        tree.truncate(idx + 1);
        let tail = tree
            .last_mut()
            .ok_or_else(|| StratumError::Internal("segment tail vanished".into()))?;
        tail.revert_append(start_row)?;
        trace!(column = self.column_index, start_row, "column.revert_append");
        Ok(())
    }

    /// Records new values for `row_ids` as a pending update of `snapshot`'s
    /// transaction. Base segments are never modified.
    ///
    /// Returns the update nodes created by this call.
    pub fn update(
        &self,
        snapshot: Snapshot,
        values: &Vector,
        row_ids: &[RowId],
    ) -> Result<Vec<UpdateNodeId>> {
        if values.len() != row_ids.len() {
            return Err(StratumError::Invalid("update values and row ids differ in length"));
        }
        if values.logical_type() != self.logical_type {
            return Err(StratumError::Invalid("update type does not match column"));
        }
        let total = self.total_rows();
        let mut updates: Vec<(RowId, Value)> = row_ids
            .iter()
            .copied()
            .zip(values.values().iter().cloned())
            .collect();
        updates.sort_by_key(|(row, _)| *row);
        if updates.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(StratumError::Invalid("duplicate row id in update"));
        }
        if updates.last().map_or(false, |(row, _)| *row >= total) {
            return Err(StratumError::Invalid("update row outside column"));
        }
        let created = self.updates.write().update(snapshot, &updates)?;
        let stats = BaseStatistics::from_values(self.logical_type, updates.iter().map(|(_, v)| v));
        self.merge_statistics(&stats);
        Ok(created)
    }

    /// Reads the whole vector holding `row_id` into `result`.
    pub fn fetch(
        &self,
        snapshot: Snapshot,
        state: &mut ColumnScanState,
        row_id: RowId,
        result: &mut Vector,
    ) -> Result<()> {
        let total = self.total_rows();
        if row_id >= total {
            return Err(StratumError::Invalid("fetch row outside column"));
        }
        let vs = self.options.vector_size as u64;
        let start = row_id - row_id % vs;
        let end = (start + vs).min(total);
        self.read_base_range(start, end, result)?;
        self.updates.read().fetch_updates(snapshot, start, result);
        state.row_index = end;
        state.max_row = total;
        state.initialized = true;
        Ok(())
    }

    /// Appends the value of `row_id` visible to `snapshot` to `result`.
    pub fn fetch_row(&self, snapshot: Snapshot, row_id: RowId, result: &mut Vector) -> Result<()> {
        if let Some(value) = self.updates.read().fetch_row(snapshot, row_id) {
            result.push_unchecked(value);
            return Ok(());
        }
        let tree = self.data.read();
        let segment = tree
            .find(row_id)
            .and_then(|idx| tree.get(idx))
            .ok_or(StratumError::Invalid("fetch row outside column"))?;
        segment.fetch_row(row_id, result)
    }

    /// Loads the committed values of the vector update `node` belongs to.
    ///
    /// `result` receives base values overlaid with the older committed
    /// updates; returns the vector's first row and the node's offsets.
    pub fn fetch_committed(
        &self,
        node: UpdateNodeId,
        result: &mut Vector,
    ) -> Result<(RowId, SmallVec<[u32; 8]>)> {
        // The update store and the segment tree are never locked together here.
        let start = self.updates.read().vector_start(node)?;
        let end = (start + self.options.vector_size as u64).min(self.total_rows());
        self.read_base_range(start, end, result)?;
        let updates = self.updates.read();
        updates.fetch_pre_image(node, result)?;
        let tuples = SmallVec::from_slice(updates.node(node)?.tuples());
        Ok((start, tuples))
    }

    /// Stamps `commit_id` on update `node`.
    pub fn commit_update(&self, node: UpdateNodeId, commit_id: CommitId) -> Result<()> {
        self.updates.read().set_version(node, commit_id)
    }

    /// Restores the owning transaction id on update `node`.
    pub fn revert_update(&self, node: UpdateNodeId, transaction_id: TxnId) -> Result<()> {
        self.updates.read().set_version(node, transaction_id)
    }

    /// Unlinks update `node` from its chain.
    pub fn rollback_update(&self, node: UpdateNodeId) -> Result<()> {
        self.updates.write().unlink(node)
    }

    /// Drops update history no snapshot at or after `watermark` can observe.
    pub fn prune_updates(&self, watermark: CommitId) -> Result<usize> {
        self.updates.write().prune(watermark)
    }

    /// Replaces the column statistics.
    pub fn set_statistics(&self, stats: BaseStatistics) {
        *self.statistics.lock() = stats;
    }

    /// Widens the column statistics with `other`.
    pub fn merge_statistics(&self, other: &BaseStatistics) {
        self.statistics.lock().merge(other);
    }

    /// Returns a copy of the column statistics.
    pub fn get_statistics(&self) -> BaseStatistics {
        self.statistics.lock().clone()
    }

    /// Appends the raw base values of rows `[from, to)` to `result`.
    pub(crate) fn read_base_range(&self, from: RowId, to: RowId, result: &mut Vector) -> Result<()> {
        result.clear();
        let tree = self.data.read();
        // A concurrently reverted append may have shrunk the column since the
        // caller sized the range; those rows were never visible to it.
        let to = to.min(tree.total_rows());
        if from >= to {
            return Ok(());
        }
        let mut idx = tree
            .find(from)
            .ok_or(StratumError::Invalid("scan start outside column"))?;
        let mut cursor = from;
        while cursor < to {
            let segment = tree
                .get(idx)
                .ok_or(StratumError::Invalid("scan end outside column"))?;
            let stop = segment.end().min(to);
            segment.scan(cursor, stop, result)?;
            cursor = stop;
            idx += 1;
        }
        Ok(())
    }

    fn next_range(&self, state: &ColumnScanState) -> Result<Option<(RowId, RowId)>> {
        if !state.initialized {
            return Err(StratumError::Invalid("scan state not initialized"));
        }
        if state.row_index >= state.max_row {
            return Ok(None);
        }
        let vs = self.options.vector_size as u64;
        let start = state.row_index;
        let end = (start - start % vs + vs).min(state.max_row);
        Ok(Some((start, end)))
    }
}
