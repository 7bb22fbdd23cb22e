//! Versioned update overlays layered on top of immutable base segments.
//!
//! Each vector of rows owns a chain of [`UpdateInfo`] nodes ordered newest
//! first. A reader walks the chain and takes, per row, the first node whose
//! version its snapshot can see; rows no visible node covers fall back to the
//! base segment value.

use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;
use tracing::trace;

use super::segment_tree::{SegmentNode, SegmentTree};
use super::stats::BaseStatistics;
use super::vector::Vector;
use crate::types::{
    is_pending_version, CommitId, LogicalType, Result, RowId, Snapshot, StratumError, TxnId, Value,
};

/// Handle of an update node inside a column's arena.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct UpdateNodeId(pub(crate) u32);

/// One transaction's new values for some rows of a single vector.
#[derive(Debug)]
pub struct UpdateInfo {
    segment: usize,
    vector_index: usize,
    version_number: AtomicU64,
    tuples: SmallVec<[u32; 8]>,
    values: Vec<Value>,
    prev: Option<UpdateNodeId>,
    next: Option<UpdateNodeId>,
}

impl UpdateInfo {
    /// Transaction id while pending, commit id once committed.
    pub fn version_number(&self) -> u64 {
        self.version_number.load(Ordering::Acquire)
    }

    /// Sorted in-vector offsets of the updated rows.
    pub fn tuples(&self) -> &[u32] {
        &self.tuples
    }

    /// New values, parallel to [`UpdateInfo::tuples`].
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Index of the owning update segment.
    pub fn segment(&self) -> usize {
        self.segment
    }

    /// Vector index inside the owning update segment.
    pub fn vector_index(&self) -> usize {
        self.vector_index
    }

    fn value_for(&self, tuple: u32) -> Option<&Value> {
        self.tuples
            .binary_search(&tuple)
            .ok()
            .map(|pos| &self.values[pos])
    }
}

/// Update bookkeeping for one row range of a column.
#[derive(Debug)]
pub struct UpdateSegment {
    start: RowId,
    count: usize,
    heads: Vec<Option<UpdateNodeId>>,
    stats: BaseStatistics,
}

impl SegmentNode for UpdateSegment {
    fn start(&self) -> RowId {
        self.start
    }

    fn count(&self) -> usize {
        self.count
    }
}

impl UpdateSegment {
    /// Statistics over every value ever written into this range.
    pub fn stats(&self) -> &BaseStatistics {
        &self.stats
    }
}

/// Per-column store of update segments and their node arena.
#[derive(Debug)]
pub(crate) struct UpdateStore {
    logical_type: LogicalType,
    vector_size: usize,
    segment_rows: usize,
    tree: SegmentTree<UpdateSegment>,
    nodes: Vec<Option<UpdateInfo>>,
    free: Vec<u32>,
    live: usize,
}

struct PendingGroup {
    segment: usize,
    vector_index: usize,
    tuples: SmallVec<[u32; 8]>,
    values: Vec<Value>,
}

impl UpdateStore {
    pub(crate) fn new(logical_type: LogicalType, vector_size: usize, segment_rows: usize) -> Self {
        Self {
            logical_type,
            vector_size,
            segment_rows,
            tree: SegmentTree::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub(crate) fn live_nodes(&self) -> usize {
        self.live
    }

    pub(crate) fn node(&self, id: UpdateNodeId) -> Result<&UpdateInfo> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| StratumError::Internal(format!("update node {} missing", id.0)))
    }

    /// First row of the vector `id` belongs to.
    pub(crate) fn vector_start(&self, id: UpdateNodeId) -> Result<RowId> {
        let node = self.node(id)?;
        let segment = self
            .tree
            .get(node.segment)
            .ok_or_else(|| StratumError::Internal("update segment missing".into()))?;
        Ok(segment.start + (node.vector_index * self.vector_size) as u64)
    }

    fn slot_of(&self, vector_start: RowId) -> Option<(usize, usize)> {
        let segment = self.tree.find(vector_start)?;
        let start = self.tree.get(segment)?.start;
        Some((segment, ((vector_start - start) as usize) / self.vector_size))
    }

    fn head(&self, vector_start: RowId) -> Option<UpdateNodeId> {
        let (segment, vector_index) = self.slot_of(vector_start)?;
        self.tree.get(segment)?.heads[vector_index]
    }

    fn ensure_segment(&mut self, row: RowId) -> Result<usize> {
        while self.tree.total_rows() <= row {
            let start = self.tree.total_rows();
            let vectors = self.segment_rows.div_ceil(self.vector_size);
            self.tree.append(UpdateSegment {
                start,
                count: self.segment_rows,
                heads: vec![None; vectors],
                stats: BaseStatistics::empty(self.logical_type),
            })?;
        }
        self.tree
            .find(row)
            .ok_or_else(|| StratumError::Internal("update segment lookup failed".into()))
    }

    /// Records new values for `updates` (sorted by row, no duplicates).
    ///
    /// Every vector is checked for conflicts before any chain is modified,
    /// so a failed call leaves the store untouched. Returns the nodes that
    /// were created; values merged into the transaction's existing head node
    /// produce no new id.
    pub(crate) fn update(
        &mut self,
        snapshot: Snapshot,
        updates: &[(RowId, Value)],
    ) -> Result<Vec<UpdateNodeId>> {
        let vs = self.vector_size as u64;
        let mut groups: Vec<PendingGroup> = Vec::new();
        let mut current_vector = None;
        for (row, value) in updates {
            let vector_start = row - row % vs;
            if current_vector != Some(vector_start) {
                let segment = self.ensure_segment(*row)?;
                let start = self.tree.get(segment).map_or(0, |s| s.start);
                groups.push(PendingGroup {
                    segment,
                    vector_index: ((vector_start - start) / vs) as usize,
                    tuples: SmallVec::new(),
                    values: Vec::new(),
                });
                current_vector = Some(vector_start);
            }
            if let Some(group) = groups.last_mut() {
                group.tuples.push((row % vs) as u32);
                group.values.push(value.clone());
            }
        }
        for group in &groups {
            self.check_conflicts(snapshot, group)?;
        }
        let mut created = Vec::new();
        for group in groups {
            if let Some(id) = self.apply_group(snapshot.transaction_id, group)? {
                created.push(id);
            }
        }
        Ok(created)
    }

    fn check_conflicts(&self, snapshot: Snapshot, group: &PendingGroup) -> Result<()> {
        let mut cursor = self.tree.get(group.segment).and_then(|s| s.heads[group.vector_index]);
        while let Some(id) = cursor {
            let node = self.node(id)?;
            let version = node.version_number();
            if version != snapshot.transaction_id
                && group.tuples.iter().any(|t| node.tuples.binary_search(t).is_ok())
            {
                if is_pending_version(version) {
                    return Err(StratumError::Conflict("row has an uncommitted update"));
                }
                if version > snapshot.start_time {
                    return Err(StratumError::Conflict(
                        "row was updated after the transaction started",
                    ));
                }
            }
            cursor = node.next;
        }
        Ok(())
    }

    fn apply_group(&mut self, txn: TxnId, group: PendingGroup) -> Result<Option<UpdateNodeId>> {
        let segment = self
            .tree
            .get_mut(group.segment)
            .ok_or_else(|| StratumError::Internal("update segment missing".into()))?;
        for value in &group.values {
            segment.stats.update(value);
        }
        let head = segment.heads[group.vector_index];
        if let Some(head_id) = head {
            let node = self.nodes[head_id.0 as usize]
                .as_mut()
                .ok_or_else(|| StratumError::Internal("update chain head missing".into()))?;
            if node.version_number() == txn {
                for (tuple, value) in group.tuples.into_iter().zip(group.values) {
                    match node.tuples.binary_search(&tuple) {
                        Ok(pos) => node.values[pos] = value,
                        Err(pos) => {
                            node.tuples.insert(pos, tuple);
                            node.values.insert(pos, value);
                        }
                    }
                }
                trace!(node = head_id.0, rows = node.tuples.len(), "column.update.merge");
                return Ok(None);
            }
        }
        let info = UpdateInfo {
            segment: group.segment,
            vector_index: group.vector_index,
            version_number: AtomicU64::new(txn),
            tuples: group.tuples,
            values: group.values,
            prev: None,
            next: head,
        };
        let id = self.allocate(info)?;
        if let Some(head_id) = head {
            if let Some(old_head) = self.nodes[head_id.0 as usize].as_mut() {
                old_head.prev = Some(id);
            }
        }
        if let Some(segment) = self.tree.get_mut(group.segment) {
            segment.heads[group.vector_index] = Some(id);
        }
        trace!(node = id.0, txn, "column.update.insert");
        Ok(Some(id))
    }

    fn allocate(&mut self, info: UpdateInfo) -> Result<UpdateNodeId> {
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            self.nodes[slot as usize] = Some(info);
            return Ok(UpdateNodeId(slot));
        }
        let slot = u32::try_from(self.nodes.len())
            .map_err(|_| StratumError::Invalid("update arena exhausted"))?;
        self.nodes.push(Some(info));
        Ok(UpdateNodeId(slot))
    }

    /// Overwrites `result` (rows `row_start..`) with values visible to `snapshot`.
    pub(crate) fn fetch_updates(&self, snapshot: Snapshot, row_start: RowId, result: &mut Vector) {
        self.overlay(row_start, result, |version| snapshot.sees(version));
    }

    /// Overwrites `result` with the newest committed values.
    ///
    /// Fails when a pending node covers one of the rows and pending updates
    /// are not allowed.
    pub(crate) fn fetch_committed_updates(
        &self,
        row_start: RowId,
        result: &mut Vector,
        watermark: CommitId,
        allow_pending_updates: bool,
    ) -> Result<()> {
        if !allow_pending_updates && self.has_unsettled(row_start, result.len(), watermark) {
            return Err(StratumError::Uncommitted(
                "index scan reached an update not visible to every snapshot",
            ));
        }
        self.overlay(row_start, result, |version| !is_pending_version(version));
        Ok(())
    }

    fn overlay(&self, row_start: RowId, result: &mut Vector, visible: impl Fn(u64) -> bool) {
        let len = result.len();
        if len == 0 || self.live == 0 {
            return;
        }
        let vs = self.vector_size as u64;
        let end = row_start + len as u64;
        let mut resolved = vec![false; len];
        let mut vector_start = row_start - row_start % vs;
        while vector_start < end {
            let mut cursor = self.head(vector_start);
            while let Some(id) = cursor {
                let Some(node) = self.nodes[id.0 as usize].as_ref() else {
                    break;
                };
                if visible(node.version_number()) {
                    for (tuple, value) in node.tuples.iter().zip(&node.values) {
                        let row = vector_start + u64::from(*tuple);
                        if row < row_start || row >= end {
                            continue;
                        }
                        let idx = (row - row_start) as usize;
                        if !resolved[idx] {
                            resolved[idx] = true;
                            result.set(idx, value.clone());
                        }
                    }
                }
                cursor = node.next;
            }
            vector_start += vs;
        }
    }

    /// Whether an update newer than `watermark` (pending ones included)
    /// covers a row of `[row_start, row_start + len)`.
    fn has_unsettled(&self, row_start: RowId, len: usize, watermark: CommitId) -> bool {
        let vs = self.vector_size as u64;
        let end = row_start + len as u64;
        let mut vector_start = row_start - row_start % vs;
        while vector_start < end {
            let mut cursor = self.head(vector_start);
            while let Some(node) = cursor.and_then(|id| self.nodes[id.0 as usize].as_ref()) {
                if node.version_number() > watermark
                    && node.tuples.iter().any(|t| {
                        let row = vector_start + u64::from(*t);
                        row >= row_start && row < end
                    })
                {
                    return true;
                }
                cursor = node.next;
            }
            vector_start += vs;
        }
        false
    }

    /// Value of `row` visible to `snapshot`, if an update covers it.
    pub(crate) fn fetch_row(&self, snapshot: Snapshot, row: RowId) -> Option<Value> {
        let vs = self.vector_size as u64;
        let tuple = (row % vs) as u32;
        let mut cursor = self.head(row - row % vs);
        while let Some(node) = cursor.and_then(|id| self.nodes[id.0 as usize].as_ref()) {
            if snapshot.sees(node.version_number()) {
                if let Some(value) = node.value_for(tuple) {
                    return Some(value.clone());
                }
            }
            cursor = node.next;
        }
        None
    }

    /// Applies the committed values older than `id` onto `base`, which holds
    /// the base values of the vector `id` belongs to.
    pub(crate) fn fetch_pre_image(&self, id: UpdateNodeId, base: &mut Vector) -> Result<()> {
        let mut resolved = vec![false; base.len()];
        let mut cursor = self.node(id)?.next;
        while let Some(older) = cursor {
            let node = self.node(older)?;
            if !is_pending_version(node.version_number()) {
                for (tuple, value) in node.tuples.iter().zip(&node.values) {
                    let idx = *tuple as usize;
                    if idx < resolved.len() && !resolved[idx] {
                        resolved[idx] = true;
                        base.set(idx, value.clone());
                    }
                }
            }
            cursor = node.next;
        }
        Ok(())
    }

    /// Stamps `version` into node `id`.
    pub(crate) fn set_version(&self, id: UpdateNodeId, version: u64) -> Result<()> {
        self.node(id)?.version_number.store(version, Ordering::Release);
        Ok(())
    }

    /// Removes node `id` from its chain and recycles its slot.
    pub(crate) fn unlink(&mut self, id: UpdateNodeId) -> Result<()> {
        let node = self.nodes[id.0 as usize]
            .take()
            .ok_or_else(|| StratumError::Internal(format!("update node {} missing", id.0)))?;
        match node.prev {
            Some(prev) => {
                if let Some(prev) = self.nodes[prev.0 as usize].as_mut() {
                    prev.next = node.next;
                }
            }
            None => {
                if let Some(segment) = self.tree.get_mut(node.segment) {
                    segment.heads[node.vector_index] = node.next;
                }
            }
        }
        if let Some(next) = node.next {
            if let Some(next) = self.nodes[next.0 as usize].as_mut() {
                next.prev = node.prev;
            }
        }
        self.free.push(id.0);
        self.live -= 1;
        Ok(())
    }

    /// Drops committed nodes no snapshot at or after `watermark` can observe.
    ///
    /// A committed node with a version at or below the watermark hides every
    /// older node for the rows it covers; an older node whose rows are all
    /// hidden is unlinked. Returns the number of nodes removed.
    pub(crate) fn prune(&mut self, watermark: CommitId) -> Result<usize> {
        if self.live == 0 {
            return Ok(0);
        }
        let mut victims = Vec::new();
        for segment in self.tree.iter() {
            for head in segment.heads.iter().flatten() {
                let mut shadowed = vec![false; self.vector_size];
                let mut cursor = Some(*head);
                while let Some(id) = cursor {
                    let node = self.node(id)?;
                    let version = node.version_number();
                    if !is_pending_version(version) && version <= watermark {
                        if node.tuples.iter().all(|t| shadowed[*t as usize]) {
                            victims.push(id);
                        } else {
                            for t in &node.tuples {
                                shadowed[*t as usize] = true;
                            }
                        }
                    }
                    cursor = node.next;
                }
            }
        }
        for id in &victims {
            self.unlink(*id)?;
        }
        if !victims.is_empty() {
            trace!(removed = victims.len(), watermark, "column.update.prune");
        }
        Ok(victims.len())
    }

    /// Statistics of the update segments overlapping `[start, end)`.
    pub(crate) fn stats_overlapping(&self, start: RowId, end: RowId) -> Option<BaseStatistics> {
        let mut merged: Option<BaseStatistics> = None;
        for segment in self.tree.iter() {
            if segment.end() <= start || segment.start >= end || segment.stats.is_empty() {
                continue;
            }
            match merged.as_mut() {
                Some(stats) => stats.merge(&segment.stats),
                None => merged = Some(segment.stats.clone()),
            }
        }
        merged
    }

    /// Number of nodes chained on the vector holding `row`.
    #[cfg(test)]
    pub(crate) fn chain_len(&self, row: RowId) -> usize {
        let vs = self.vector_size as u64;
        let mut cursor = self.head(row - row % vs);
        let mut len = 0;
        while let Some(node) = cursor.and_then(|id| self.nodes[id.0 as usize].as_ref()) {
            len += 1;
            cursor = node.next;
        }
        len
    }
}
