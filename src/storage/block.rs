//! Encoded column blocks and the registry that hands out persistent ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::primitives::bytes::ord;
use crate::types::{BlockId, LogicalType, Result, StratumError, Value};

/// Null tracking for the rows of a block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct ValidityMask {
    words: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    fn push(&mut self, valid: bool) {
        let (word, bit) = (self.len / 64, self.len % 64);
        if word == self.words.len() {
            self.words.push(0);
        }
        if valid {
            self.words[word] |= 1 << bit;
        } else {
            self.words[word] &= !(1 << bit);
        }
        self.len += 1;
    }

    fn is_valid(&self, idx: usize) -> bool {
        idx < self.len && self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        self.len = len;
        self.words.truncate(len.div_ceil(64));
    }
}

#[derive(Clone, Debug, PartialEq)]
enum BlockPayload {
    /// Fixed-width order-preserving encodings, `width` bytes per row.
    Numeric { width: usize, bytes: Vec<u8> },
    /// Distinct strings plus one dictionary code per row.
    Dictionary {
        entries: Vec<String>,
        lookup: FxHashMap<String, u32>,
        codes: Vec<u32>,
    },
}

/// The encoded data of one column segment.
///
/// A block registered with the [`BlockManager`] carries its `block_id`; a
/// block detached for in-memory mutation carries none.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedBlock {
    block_id: Option<BlockId>,
    logical_type: LogicalType,
    capacity: usize,
    validity: ValidityMask,
    payload: BlockPayload,
}

impl EncodedBlock {
    /// Creates an empty block holding up to `capacity` rows.
    pub fn new(logical_type: LogicalType, capacity: usize) -> Self {
        let payload = match logical_type.fixed_width() {
            Some(width) => BlockPayload::Numeric {
                width,
                bytes: Vec::with_capacity(width * capacity.min(4096)),
            },
            None => BlockPayload::Dictionary {
                entries: Vec::new(),
                lookup: FxHashMap::default(),
                codes: Vec::new(),
            },
        };
        Self {
            block_id: None,
            logical_type,
            capacity,
            validity: ValidityMask::default(),
            payload,
        }
    }

    /// Encodes `values` into a block sized to hold exactly them.
    pub fn from_values(logical_type: LogicalType, values: &[Value]) -> Result<Self> {
        let mut block = Self::new(logical_type, values.len());
        for value in values {
            block.push(value)?;
        }
        Ok(block)
    }

    /// Identifier of the registered block this data still belongs to.
    pub fn block_id(&self) -> Option<BlockId> {
        self.block_id
    }

    /// Type encoded in the block.
    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    /// Number of encoded rows.
    pub fn len(&self) -> usize {
        self.validity.len
    }

    /// Returns true when no row is encoded.
    pub fn is_empty(&self) -> bool {
        self.validity.len == 0
    }

    /// Maximum number of rows.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rows that can still be appended.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Raw fixed-width payload, if the block is numeric.
    pub fn numeric_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            BlockPayload::Numeric { bytes, .. } => Some(bytes),
            BlockPayload::Dictionary { .. } => None,
        }
    }

    /// Detaches the block from its registered identity so it may be mutated.
    pub fn to_temporary(&mut self) {
        self.block_id = None;
    }

    /// Encodes one value at the end of the block.
    pub fn push(&mut self, value: &Value) -> Result<()> {
        if self.remaining() == 0 {
            return Err(StratumError::Invalid("block is full"));
        }
        if !value.conforms_to(self.logical_type) {
            return Err(StratumError::Invalid("value type does not match block type"));
        }
        let valid = !value.is_null();
        match &mut self.payload {
            BlockPayload::Numeric { width, bytes } => {
                let mut slot = [0u8; 8];
                match value {
                    Value::Boolean(v) => slot[0] = u8::from(*v),
                    Value::Integer(v) => ord::put_i32_be(&mut slot, *v),
                    Value::BigInt(v) => ord::put_i64_be(&mut slot, *v),
                    Value::Double(v) => ord::put_f64_be(&mut slot, *v),
                    Value::Null => {}
                    Value::Varchar(_) => {
                        return Err(StratumError::Internal(
                            "varchar routed to numeric payload".into(),
                        ))
                    }
                }
                bytes.extend_from_slice(&slot[..*width]);
            }
            BlockPayload::Dictionary {
                entries,
                lookup,
                codes,
            } => {
                let code = match value {
                    Value::Varchar(s) => match lookup.get(s) {
                        Some(&code) => code,
                        None => {
                            let code = u32::try_from(entries.len())
                                .map_err(|_| StratumError::Invalid("dictionary overflow"))?;
                            entries.push(s.clone());
                            lookup.insert(s.clone(), code);
                            code
                        }
                    },
                    _ => 0,
                };
                codes.push(code);
            }
        }
        self.validity.push(valid);
        Ok(())
    }

    /// Decodes the value at row `idx`.
    pub fn get(&self, idx: usize) -> Result<Value> {
        if idx >= self.len() {
            return Err(StratumError::Invalid("block offset out of range"));
        }
        if !self.validity.is_valid(idx) {
            return Ok(Value::Null);
        }
        match &self.payload {
            BlockPayload::Numeric { width, bytes } => {
                let slot = &bytes[idx * width..(idx + 1) * width];
                Ok(match self.logical_type {
                    LogicalType::Boolean => Value::Boolean(slot[0] != 0),
                    LogicalType::Integer => Value::Integer(ord::get_i32_be(slot)),
                    LogicalType::BigInt => Value::BigInt(ord::get_i64_be(slot)),
                    LogicalType::Double => Value::Double(ord::get_f64_be(slot)),
                    LogicalType::Varchar => {
                        return Err(StratumError::Corruption("varchar block with numeric payload"))
                    }
                })
            }
            BlockPayload::Dictionary { entries, codes, .. } => entries
                .get(codes[idx] as usize)
                .cloned()
                .map(Value::Varchar)
                .ok_or(StratumError::Corruption("dictionary code out of range")),
        }
    }

    /// Drops every row at or after `len`.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len() {
            return;
        }
        self.validity.truncate(len);
        match &mut self.payload {
            BlockPayload::Numeric { width, bytes } => bytes.truncate(len * *width),
            // Dictionary entries stay; unused codes are harmless.
            BlockPayload::Dictionary { codes, .. } => codes.truncate(len),
        }
    }
}

/// Registry of immutable blocks backing persistent segments.
#[derive(Debug, Default)]
pub struct BlockManager {
    blocks: RwLock<FxHashMap<BlockId, Arc<EncodedBlock>>>,
    next_block: AtomicU64,
}

impl BlockManager {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns an id to `block`, freezes it and returns the shared handle.
    pub fn register(&self, mut block: EncodedBlock) -> (BlockId, Arc<EncodedBlock>) {
        let id = BlockId(self.next_block.fetch_add(1, Ordering::Relaxed));
        block.block_id = Some(id);
        let shared = Arc::new(block);
        self.blocks.write().insert(id, Arc::clone(&shared));
        trace!(block = id.0, rows = shared.len(), "block.register");
        (id, shared)
    }

    /// Returns the shared handle for `id`.
    pub fn get(&self, id: BlockId) -> Result<Arc<EncodedBlock>> {
        self.blocks.read().get(&id).cloned().ok_or(StratumError::NotFound)
    }

    /// Number of registered blocks.
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// Returns true when no block is registered.
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}
