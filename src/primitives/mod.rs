//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities, the commit lock, and the write-ahead log
//! interface consumed by commit processing.

/// Byte-level utilities and encoding/decoding.
///
/// Order-preserving fixed-width encoders and length-prefixed framing.
pub mod bytes;

/// Concurrency primitives and synchronization.
///
/// The global commit lock serializing commit and abort passes.
pub mod concurrency;

/// Write-ahead logging (WAL) interface.
///
/// The sink commit processing records catalog and data changes into.
pub mod wal;
