//! Per-row insert and delete versions, one chunk per vector of rows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use smallvec::SmallVec;

use super::vector::SelectionVector;
use crate::types::{
    is_pending_version, Result, RowId, Snapshot, StratumError, TxnId, NOT_DELETED_ID,
};

/// Insert and delete versions of one vector of rows.
#[derive(Debug)]
pub struct ChunkVersionInfo {
    start: RowId,
    inserted: Box<[AtomicU64]>,
    deleted: Box<[AtomicU64]>,
}

impl ChunkVersionInfo {
    fn new(start: RowId, rows: usize) -> Self {
        let fill = |_| AtomicU64::new(NOT_DELETED_ID);
        Self {
            start,
            inserted: (0..rows).map(fill).collect(),
            deleted: (0..rows).map(fill).collect(),
        }
    }

    /// First row of the chunk.
    pub fn start(&self) -> RowId {
        self.start
    }

    /// Insert version of the row at `offset`.
    pub fn inserted(&self, offset: usize) -> u64 {
        self.inserted[offset].load(Ordering::Acquire)
    }

    /// Delete version of the row at `offset`.
    pub fn deleted(&self, offset: usize) -> u64 {
        self.deleted[offset].load(Ordering::Acquire)
    }

    fn is_visible(&self, snapshot: Snapshot, offset: usize) -> bool {
        snapshot.sees(self.inserted(offset)) && !snapshot.sees(self.deleted(offset))
    }
}

/// Row-level version store of a table.
#[derive(Debug)]
pub struct RowVersions {
    vector_size: usize,
    chunks: RwLock<Vec<Arc<ChunkVersionInfo>>>,
}

impl RowVersions {
    /// Creates an empty store with `vector_size` rows per chunk.
    pub fn new(vector_size: usize) -> Self {
        Self {
            vector_size,
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Splits `row` into chunk index and in-chunk offset.
    pub fn locate(&self, row: RowId) -> (usize, usize) {
        let vs = self.vector_size as u64;
        ((row / vs) as usize, (row % vs) as usize)
    }

    /// Returns chunk `idx`.
    pub fn chunk(&self, idx: usize) -> Result<Arc<ChunkVersionInfo>> {
        self.chunks
            .read()
            .get(idx)
            .cloned()
            .ok_or(StratumError::Invalid("row version chunk missing"))
    }

    /// Stamps rows `[start, start + count)` as inserted at `version`.
    pub fn append(&self, start: RowId, count: usize, version: u64) {
        if count == 0 {
            return;
        }
        let end = start + count as u64;
        let (last_chunk, _) = self.locate(end - 1);
        let mut chunks = self.chunks.write();
        while chunks.len() <= last_chunk {
            let chunk_start = (chunks.len() * self.vector_size) as u64;
            chunks.push(Arc::new(ChunkVersionInfo::new(chunk_start, self.vector_size)));
        }
        for row in start..end {
            let (idx, offset) = self.locate(row);
            chunks[idx].deleted[offset].store(NOT_DELETED_ID, Ordering::Release);
            chunks[idx].inserted[offset].store(version, Ordering::Release);
        }
    }

    /// Rewrites the insert version of rows `[start, start + count)`.
    pub fn set_inserted(&self, start: RowId, count: usize, version: u64) -> Result<()> {
        let chunks = self.chunks.read();
        for row in start..start + count as u64 {
            let (idx, offset) = self.locate(row);
            let chunk = chunks
                .get(idx)
                .ok_or(StratumError::Invalid("row version chunk missing"))?;
            chunk.inserted[offset].store(version, Ordering::Release);
        }
        Ok(())
    }

    /// Forgets every row at or after `start`.
    pub fn truncate(&self, start: RowId) {
        let (idx, offset) = self.locate(start);
        let mut chunks = self.chunks.write();
        let keep = if offset == 0 { idx } else { idx + 1 };
        chunks.truncate(keep);
        if offset != 0 {
            if let Some(chunk) = chunks.get(idx) {
                for slot in offset..self.vector_size {
                    chunk.inserted[slot].store(NOT_DELETED_ID, Ordering::Release);
                    chunk.deleted[slot].store(NOT_DELETED_ID, Ordering::Release);
                }
            }
        }
    }

    /// Number of rows in `[start, end)` carrying any delete mark.
    pub fn count_deleted(&self, start: RowId, end: RowId) -> usize {
        let chunks = self.chunks.read();
        (start..end)
            .filter(|&row| {
                let (idx, offset) = self.locate(row);
                chunks
                    .get(idx)
                    .map_or(false, |chunk| chunk.deleted(offset) != NOT_DELETED_ID)
            })
            .count()
    }

    /// Returns true when `row` is visible to `snapshot`.
    pub fn is_visible(&self, snapshot: Snapshot, row: RowId) -> bool {
        let (idx, offset) = self.locate(row);
        self.chunks
            .read()
            .get(idx)
            .map_or(false, |chunk| chunk.is_visible(snapshot, offset))
    }

    /// Offsets of rows `[start, start + count)` visible to `snapshot`.
    ///
    /// The range must not cross a chunk boundary.
    pub fn select_visible(&self, snapshot: Snapshot, start: RowId, count: usize) -> SelectionVector {
        let (idx, first) = self.locate(start);
        let Ok(chunk) = self.chunk(idx) else {
            return SelectionVector::default();
        };
        let indices = (0..count)
            .filter(|i| first + i < self.vector_size && chunk.is_visible(snapshot, first + i))
            .map(|i| i as u32)
            .collect();
        SelectionVector::from_indices(indices)
    }

    /// Marks `offsets` of chunk `idx` deleted by `snapshot`'s transaction.
    ///
    /// Returns the offsets newly marked by this call. On a conflict the
    /// offsets marked before it are returned alongside the error so the
    /// caller can record them for rollback.
    pub fn delete(
        &self,
        snapshot: Snapshot,
        idx: usize,
        offsets: &[u32],
    ) -> (SmallVec<[u32; 16]>, Option<StratumError>) {
        let mut marked = SmallVec::new();
        let chunk = match self.chunk(idx) {
            Ok(chunk) => chunk,
            Err(err) => return (marked, Some(err)),
        };
        let txn = snapshot.transaction_id;
        for &offset in offsets {
            let slot = offset as usize;
            let inserted = chunk.inserted(slot);
            if !snapshot.sees(inserted) {
                let err = if is_pending_version(inserted) {
                    StratumError::Conflict("row inserted by a concurrent transaction")
                } else {
                    StratumError::Invalid("row not visible to the transaction")
                };
                return (marked, Some(err));
            }
            let current = chunk.deleted(slot);
            if current == txn || (!is_pending_version(current) && current <= snapshot.start_time) {
                continue;
            }
            if current != NOT_DELETED_ID {
                let err = if is_pending_version(current) {
                    StratumError::Conflict("row deleted by a concurrent transaction")
                } else {
                    StratumError::Conflict("row deleted after the transaction started")
                };
                return (marked, Some(err));
            }
            match chunk.deleted[slot].compare_exchange(
                NOT_DELETED_ID,
                txn,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => marked.push(offset),
                Err(_) => {
                    return (
                        marked,
                        Some(StratumError::Conflict("row deleted by a concurrent transaction")),
                    )
                }
            }
        }
        (marked, None)
    }

    /// Stamps `version` into the delete slot of `offsets` of chunk `idx`.
    pub fn set_deleted(&self, idx: usize, offsets: &[u32], version: u64) -> Result<()> {
        let chunk = self.chunk(idx)?;
        for &offset in offsets {
            chunk.deleted[offset as usize].store(version, Ordering::Release);
        }
        Ok(())
    }

    /// Clears delete marks owned by `txn` on `offsets` of chunk `idx`.
    pub fn undo_delete(&self, idx: usize, offsets: &[u32], txn: TxnId) -> Result<usize> {
        let chunk = self.chunk(idx)?;
        let mut cleared = 0;
        for &offset in offsets {
            if chunk.deleted[offset as usize]
                .compare_exchange(txn, NOT_DELETED_ID, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}
