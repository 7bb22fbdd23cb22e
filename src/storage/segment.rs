//! Column segments: one encoded block plus the row range it covers.

use std::sync::Arc;

use tracing::debug;

use super::block::EncodedBlock;
use super::segment_tree::SegmentNode;
use super::stats::BaseStatistics;
use super::vector::{SelectionVector, Vector};
use crate::types::{BlockId, LogicalType, Result, RowId, StratumError, Value};

/// Storage class of a [`ColumnSegment`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ColumnSegmentType {
    /// Backed by a registered, immutable block.
    Persistent,
    /// Backed by a private, mutable in-memory block.
    Transient,
}

#[derive(Debug)]
enum SegmentData {
    Persistent {
        block_id: BlockId,
        block: Arc<EncodedBlock>,
    },
    Transient(EncodedBlock),
}

/// A contiguous row range of one column.
#[derive(Debug)]
pub struct ColumnSegment {
    logical_type: LogicalType,
    start: RowId,
    count: usize,
    stats: BaseStatistics,
    data: SegmentData,
}

impl SegmentNode for ColumnSegment {
    fn start(&self) -> RowId {
        self.start
    }

    fn count(&self) -> usize {
        self.count
    }
}

impl ColumnSegment {
    /// Creates an empty transient segment starting at `start`.
    pub fn transient(logical_type: LogicalType, start: RowId, capacity: usize) -> Self {
        Self {
            logical_type,
            start,
            count: 0,
            stats: BaseStatistics::empty(logical_type),
            data: SegmentData::Transient(EncodedBlock::new(logical_type, capacity)),
        }
    }

    /// Wraps a registered block as a persistent segment starting at `start`.
    ///
    /// Statistics are computed from the block when none are supplied.
    pub fn persistent(
        block: Arc<EncodedBlock>,
        start: RowId,
        stats: Option<BaseStatistics>,
    ) -> Result<Self> {
        let block_id = block
            .block_id()
            .ok_or(StratumError::Invalid("persistent segment needs a registered block"))?;
        let logical_type = block.logical_type();
        let stats = match stats {
            Some(stats) => stats,
            None => {
                let mut stats = BaseStatistics::empty(logical_type);
                for idx in 0..block.len() {
                    stats.update(&block.get(idx)?);
                }
                stats
            }
        };
        Ok(Self {
            logical_type,
            start,
            count: block.len(),
            stats,
            data: SegmentData::Persistent { block_id, block },
        })
    }

    /// Storage class of the segment.
    pub fn segment_type(&self) -> ColumnSegmentType {
        match self.data {
            SegmentData::Persistent { .. } => ColumnSegmentType::Persistent,
            SegmentData::Transient(_) => ColumnSegmentType::Transient,
        }
    }

    /// Type of the values stored.
    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    /// Statistics over the stored base values.
    pub fn stats(&self) -> &BaseStatistics {
        &self.stats
    }

    /// Registered block id of a persistent segment.
    pub fn block_id(&self) -> Option<BlockId> {
        match &self.data {
            SegmentData::Persistent { block_id, .. } => Some(*block_id),
            SegmentData::Transient(_) => None,
        }
    }

    /// Borrow the encoded block.
    pub fn block(&self) -> &EncodedBlock {
        match &self.data {
            SegmentData::Persistent { block, .. } => block,
            SegmentData::Transient(block) => block,
        }
    }

    /// Returns true when no more rows fit.
    pub fn is_full(&self) -> bool {
        self.block().remaining() == 0
    }

    /// Value stored at absolute `row`.
    pub fn value(&self, row: RowId) -> Result<Value> {
        let offset = self.offset_of(row)?;
        self.block().get(offset)
    }

    /// Appends rows `[from, to)` of the segment to `result`.
    pub fn scan(&self, from: RowId, to: RowId, result: &mut Vector) -> Result<()> {
        let (begin, end) = (self.offset_of(from)?, self.end_offset_of(to)?);
        let block = self.block();
        for offset in begin..end {
            result.push_unchecked(block.get(offset)?);
        }
        Ok(())
    }

    /// Appends only the rows `base + sel[i]` to `result`, in selection order.
    pub fn filter_scan(
        &self,
        base: RowId,
        sel: &SelectionVector,
        result: &mut Vector,
    ) -> Result<()> {
        for &idx in sel.indices() {
            result.push_unchecked(self.value(base + u64::from(idx))?);
        }
        Ok(())
    }

    /// Appends the value at `row` to `result`.
    pub fn fetch_row(&self, row: RowId, result: &mut Vector) -> Result<()> {
        result.push_unchecked(self.value(row)?);
        Ok(())
    }

    /// Appends `count` values of `vector` starting at `offset`.
    ///
    /// Returns how many rows fit before the block filled up.
    pub fn append(&mut self, vector: &Vector, offset: usize, count: usize) -> Result<usize> {
        let block = match &mut self.data {
            SegmentData::Transient(block) => block,
            SegmentData::Persistent { .. } => {
                return Err(StratumError::Invalid("cannot append to a persistent segment"))
            }
        };
        let values = vector
            .values()
            .get(offset..offset + count)
            .ok_or(StratumError::Invalid("append range exceeds vector"))?;
        let fit = count.min(block.remaining());
        for value in &values[..fit] {
            block.push(value)?;
            self.stats.update(value);
        }
        self.count += fit;
        Ok(fit)
    }

    /// Drops rows at or after `start_row`.
    pub fn revert_append(&mut self, start_row: RowId) -> Result<()> {
        let block = match &mut self.data {
            SegmentData::Transient(block) => block,
            SegmentData::Persistent { .. } => {
                return Err(StratumError::Invalid("cannot revert a persistent segment"))
            }
        };
        let keep = start_row.saturating_sub(self.start).min(self.count as u64) as usize;
        block.truncate(keep);
        self.count = keep;
        Ok(())
    }

    /// Converts the segment into a transient one that may be mutated.
    ///
    /// A block nobody else references is taken over in place; a shared block
    /// is copied first. Either way the registered block itself is never
    /// modified.
    pub fn into_transient(self) -> ColumnSegment {
        let data = match self.data {
            SegmentData::Transient(block) => SegmentData::Transient(block),
            SegmentData::Persistent { block_id, block } => {
                let shared = Arc::strong_count(&block) > 1;
                let mut owned = Arc::try_unwrap(block).unwrap_or_else(|shared| (*shared).clone());
                if owned.block_id() == Some(block_id) {
                    owned.to_temporary();
                }
                debug!(
                    block = block_id.0,
                    start = self.start,
                    rows = self.count,
                    copied = shared,
                    "column.segment.promote"
                );
                SegmentData::Transient(owned)
            }
        };
        ColumnSegment { data, ..self }
    }

    fn offset_of(&self, row: RowId) -> Result<usize> {
        if row < self.start || row >= self.end() {
            return Err(StratumError::Invalid("row outside segment"));
        }
        Ok((row - self.start) as usize)
    }

    fn end_offset_of(&self, row: RowId) -> Result<usize> {
        if row < self.start || row > self.end() {
            return Err(StratumError::Invalid("row outside segment"));
        }
        Ok((row - self.start) as usize)
    }
}
