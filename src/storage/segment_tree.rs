//! Ordered, contiguous collections of row-range nodes.

use crate::types::{Result, RowId, StratumError};

/// A node covering the half-open row range `[start, start + count)`.
pub trait SegmentNode {
    /// First row covered by the node.
    fn start(&self) -> RowId;
    /// Number of rows covered by the node.
    fn count(&self) -> usize;
    /// One past the last row covered by the node.
    fn end(&self) -> RowId {
        self.start() + self.count() as u64
    }
}

/// Segments ordered by start row with no gaps or overlaps.
///
/// For consecutive nodes `a, b` the tree keeps `b.start() == a.end()`.
#[derive(Debug)]
pub struct SegmentTree<T> {
    nodes: Vec<T>,
}

impl<T> Default for SegmentTree<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T: SegmentNode> SegmentTree<T> {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tree from nodes that must already be contiguous.
    pub fn from_nodes(nodes: Vec<T>) -> Result<Self> {
        let tree = Self { nodes };
        tree.check_contiguous()?;
        Ok(tree)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true when the tree holds no node.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Borrow node `idx`.
    pub fn get(&self, idx: usize) -> Option<&T> {
        self.nodes.get(idx)
    }

    /// Mutably borrow node `idx`.
    ///
    /// Callers may grow `count` only on the last node; changing the range of
    /// an inner node breaks contiguity.
    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.nodes.get_mut(idx)
    }

    /// Borrow the last node.
    pub fn last(&self) -> Option<&T> {
        self.nodes.last()
    }

    /// Mutably borrow the last node.
    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.nodes.last_mut()
    }

    /// Iterates nodes in row order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.nodes.iter()
    }

    /// First row covered by the tree.
    pub fn base_row(&self) -> Option<RowId> {
        self.nodes.first().map(SegmentNode::start)
    }

    /// One past the last row covered by the tree, or zero when empty.
    pub fn total_rows(&self) -> RowId {
        self.nodes.last().map_or(0, SegmentNode::end)
    }

    /// Index of the node containing `row`.
    ///
    /// Binary search over start rows; segment contents are never read.
    pub fn find(&self, row: RowId) -> Option<usize> {
        let after = self.nodes.partition_point(|node| node.start() <= row);
        let idx = after.checked_sub(1)?;
        (row < self.nodes[idx].end()).then_some(idx)
    }

    /// Appends `node`, which must start where the current last node ends.
    pub fn append(&mut self, node: T) -> Result<()> {
        if let Some(last) = self.nodes.last() {
            if node.start() != last.end() {
                return Err(StratumError::Invalid("segment does not start at tree end"));
            }
        }
        self.nodes.push(node);
        Ok(())
    }

    /// Removes and returns the last node.
    pub fn pop(&mut self) -> Option<T> {
        self.nodes.pop()
    }

    /// Keeps only the first `len` nodes.
    pub fn truncate(&mut self, len: usize) {
        self.nodes.truncate(len);
    }

    /// Verifies that no two consecutive nodes leave a gap or overlap.
    pub fn check_contiguous(&self) -> Result<()> {
        for pair in self.nodes.windows(2) {
            if pair[1].start() != pair[0].end() {
                return Err(StratumError::Corruption("segment tree is not contiguous"));
            }
        }
        Ok(())
    }
}
