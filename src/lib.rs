//! Columnar storage and transactional commit core.
//!
//! Columns live in segment trees of persistent and transient segments, row
//! changes are tracked in version chunks and update chains, and a
//! transaction's undo buffer is replayed by either the commit pass (which
//! writes through a [`primitives::wal::WriteAheadLog`]) or the revert and
//! rollback passes.

#![warn(missing_docs)]

pub mod catalog;
pub mod primitives;
pub mod storage;
pub mod transaction;
pub mod types;
