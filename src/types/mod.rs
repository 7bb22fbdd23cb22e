#![forbid(unsafe_code)]

//! Identifiers, snapshots and the crate error type.

mod value;

pub use value::{LogicalType, Value};

use std::fmt;

/// Absolute row position inside a table, shared by every column.
pub type RowId = u64;
/// Identifier handed to a running transaction.
pub type TxnId = u64;
/// Identifier stamped on data once its transaction commits.
pub type CommitId = u64;

/// First identifier handed to running transactions.
///
/// Commit ids live strictly below this value, so a version number at or
/// above it always denotes uncommitted work.
pub const TRANSACTION_ID_START: TxnId = 1 << 62;

/// Version stored in delete slots of rows that were never deleted.
pub const NOT_DELETED_ID: u64 = u64::MAX;

/// Version carried by data that predates every transaction.
pub const PERSISTENT_VERSION: CommitId = 0;

/// Identifier of an encoded block registered with the block manager.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct BlockId(pub u64);

/// Identifier of a physical table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TableId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns true when `version` names a transaction that has not committed.
#[inline]
pub fn is_pending_version(version: u64) -> bool {
    version >= TRANSACTION_ID_START && version != NOT_DELETED_ID
}

/// Point-in-time view a reader or writer evaluates versions against.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Newest commit id included in the view.
    pub start_time: CommitId,
    /// Transaction whose own uncommitted writes are part of the view.
    pub transaction_id: TxnId,
}

impl Snapshot {
    /// Snapshot of a transaction started after commit `start_time`.
    pub const fn new(start_time: CommitId, transaction_id: TxnId) -> Self {
        Self {
            start_time,
            transaction_id,
        }
    }

    /// Read-only view of everything committed up to `start_time`.
    pub const fn committed(start_time: CommitId) -> Self {
        Self {
            start_time,
            transaction_id: PERSISTENT_VERSION,
        }
    }

    /// Returns true when data stamped with `version` is visible.
    #[inline]
    pub fn sees(&self, version: u64) -> bool {
        version <= self.start_time || version == self.transaction_id
    }
}

/// Errors surfaced by storage, catalog and commit processing.
#[derive(thiserror::Error, Debug)]
pub enum StratumError {
    /// Underlying I/O failure, usually from a log sink.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Lookup target does not exist.
    #[error("not found")]
    NotFound,
    /// Write-write conflict with another transaction.
    #[error("transaction conflict: {0}")]
    Conflict(&'static str),
    /// Scan reached an update that has not committed yet.
    #[error("uncommitted update: {0}")]
    Uncommitted(&'static str),
    /// Referenced table or catalog has been dropped.
    #[error("closed: {0}")]
    Closed(&'static str),
    /// Internal consistency violation; the operation cannot be retried.
    #[error("internal error: {0}")]
    Internal(String),
    /// Alter payload could not be encoded or decoded.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StratumError {
    /// Returns true for failures that indicate a bug rather than a caller mistake.
    pub fn is_internal(&self) -> bool {
        matches!(self, StratumError::Internal(_) | StratumError::Corruption(_))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, StratumError>;
