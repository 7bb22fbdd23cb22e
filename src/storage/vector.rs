use crate::types::{LogicalType, Result, RowId, StratumError, Value};

/// Typed column batch passed between segments, scans and the log.
#[derive(Clone, Debug, PartialEq)]
pub struct Vector {
    logical_type: LogicalType,
    values: Vec<Value>,
}

impl Vector {
    /// Creates an empty vector of `logical_type`.
    pub fn new(logical_type: LogicalType) -> Self {
        Self {
            logical_type,
            values: Vec::new(),
        }
    }

    /// Creates an empty vector with room for `capacity` values.
    pub fn with_capacity(logical_type: LogicalType, capacity: usize) -> Self {
        Self {
            logical_type,
            values: Vec::with_capacity(capacity),
        }
    }

    /// Builds a vector from values, rejecting any that do not match `logical_type`.
    pub fn from_values(logical_type: LogicalType, values: Vec<Value>) -> Result<Self> {
        if values.iter().any(|value| !value.conforms_to(logical_type)) {
            return Err(StratumError::Invalid("value type does not match vector type"));
        }
        Ok(Self {
            logical_type,
            values,
        })
    }

    /// Builds a row-id vector.
    pub fn from_row_ids(rows: impl IntoIterator<Item = RowId>) -> Self {
        Self {
            logical_type: LogicalType::ROW_ID,
            values: rows.into_iter().map(|row| Value::BigInt(row as i64)).collect(),
        }
    }

    /// Logical type of every value in the vector.
    pub fn logical_type(&self) -> LogicalType {
        self.logical_type
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when the vector holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow the value at `idx`.
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Borrow all values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Appends a value after checking its type.
    pub fn push(&mut self, value: Value) -> Result<()> {
        if !value.conforms_to(self.logical_type) {
            return Err(StratumError::Invalid("value type does not match vector type"));
        }
        self.values.push(value);
        Ok(())
    }

    /// Overwrites the value at `idx`.
    pub(crate) fn set(&mut self, idx: usize, value: Value) {
        self.values[idx] = value;
    }

    /// Appends a value already known to conform.
    pub(crate) fn push_unchecked(&mut self, value: Value) {
        debug_assert!(value.conforms_to(self.logical_type));
        self.values.push(value);
    }

    /// Removes every value while keeping the allocation.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Keeps only the positions listed in `sel`, in selection order.
    pub fn slice(&mut self, sel: &SelectionVector) {
        let mut kept = Vec::with_capacity(sel.len());
        for &idx in sel.indices() {
            kept.push(std::mem::replace(&mut self.values[idx as usize], Value::Null));
        }
        self.values = kept;
    }

    /// Reads the vector as row ids.
    pub fn row_ids(&self) -> Result<Vec<RowId>> {
        self.values
            .iter()
            .map(|value| value.as_row_id().ok_or(StratumError::Invalid("row id must be a non-negative integer")))
            .collect()
    }
}

/// Ordered set of in-vector offsets that survive a filter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionVector {
    indices: Vec<u32>,
}

impl SelectionVector {
    /// Selects offsets `0..count`.
    pub fn incremental(count: usize) -> Self {
        Self {
            indices: (0..count as u32).collect(),
        }
    }

    /// Selects the given offsets.
    pub fn from_indices(indices: Vec<u32>) -> Self {
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        Self { indices }
    }

    /// Number of selected offsets.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Returns true when nothing is selected.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Selected offsets in ascending order.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Keeps only offsets for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(u32) -> bool) {
        self.indices.retain(|&idx| keep(idx));
    }
}

/// A set of equally sized vectors making up a batch of rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataChunk {
    columns: Vec<Vector>,
}

impl DataChunk {
    /// Creates an empty chunk with one vector per type.
    pub fn new(types: &[LogicalType]) -> Self {
        let mut chunk = Self::default();
        chunk.initialize(types);
        chunk
    }

    /// Builds a chunk from vectors of equal length.
    pub fn from_vectors(columns: Vec<Vector>) -> Result<Self> {
        if let Some(first) = columns.first() {
            if columns.iter().any(|column| column.len() != first.len()) {
                return Err(StratumError::Invalid("chunk vectors differ in length"));
            }
        }
        Ok(Self { columns })
    }

    /// Replaces the chunk layout with empty vectors of the given types.
    pub fn initialize(&mut self, types: &[LogicalType]) {
        self.columns = types.iter().map(|&ty| Vector::new(ty)).collect();
    }

    /// Returns true once [`DataChunk::initialize`] has set a layout.
    pub fn is_initialized(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Empties every vector, keeping the layout.
    pub fn reset(&mut self) {
        for column in &mut self.columns {
            column.clear();
        }
    }

    /// Number of rows.
    pub fn size(&self) -> usize {
        self.columns.first().map_or(0, Vector::len)
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Borrow column `idx`.
    pub fn column(&self, idx: usize) -> &Vector {
        &self.columns[idx]
    }

    /// Mutably borrow column `idx`.
    pub fn column_mut(&mut self, idx: usize) -> &mut Vector {
        &mut self.columns[idx]
    }

    /// Borrow every column.
    pub fn columns(&self) -> &[Vector] {
        &self.columns
    }

    /// Logical types of the columns.
    pub fn types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(Vector::logical_type).collect()
    }

    /// Keeps only the rows listed in `sel`.
    pub fn slice(&mut self, sel: &SelectionVector) {
        for column in &mut self.columns {
            column.slice(sel);
        }
    }

    /// Collects row `idx` across all columns.
    pub fn row(&self, idx: usize) -> Vec<Value> {
        self.columns
            .iter()
            .map(|column| column.get(idx).cloned().unwrap_or(Value::Null))
            .collect()
    }
}
