//! Columnar table storage.
//!
//! Tables are split into columns; each column keeps its base data in a
//! [`SegmentTree`] of persistent or transient segments and its pending and
//! committed changes in per-vector update chains.

/// Encoded blocks and the registry of persistent ones.
pub mod block;

/// Column segments and the copy-on-write promotion of persistent ones.
pub mod segment;

/// Min/max statistics and scan filters.
pub mod stats;

mod column;
mod options;
mod segment_tree;
mod table;
mod update;
mod vector;
mod version;

pub use block::{BlockManager, EncodedBlock};
pub use column::{ColumnAppendState, ColumnData, ColumnScanState};
pub use options::{ConfigError, StorageOptions, DEFAULT_VECTORS_PER_SEGMENT, DEFAULT_VECTOR_SIZE};
pub use segment::{ColumnSegment, ColumnSegmentType};
pub use segment_tree::{SegmentNode, SegmentTree};
pub use stats::{BaseStatistics, ComparisonOp, FilterPropagateResult, TableFilter};
pub use table::{DataTable, DataTableInfo, TableScanState, ROW_ID_COLUMN};
pub use update::{UpdateInfo, UpdateNodeId, UpdateSegment};
pub use vector::{DataChunk, SelectionVector, Vector};
pub use version::{ChunkVersionInfo, RowVersions};
