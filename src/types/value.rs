use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Physical column types supported by the segment encoders.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    /// Single-byte boolean.
    Boolean,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer; also used for row ids.
    BigInt,
    /// IEEE-754 double.
    Double,
    /// UTF-8 string, dictionary encoded in blocks.
    Varchar,
}

impl LogicalType {
    /// Type used when row ids travel inside a chunk.
    pub const ROW_ID: LogicalType = LogicalType::BigInt;

    /// Encoded width in bytes for fixed-width types.
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            LogicalType::Boolean => Some(1),
            LogicalType::Integer => Some(4),
            LogicalType::BigInt | LogicalType::Double => Some(8),
            LogicalType::Varchar => None,
        }
    }

    /// Returns true for types with an arithmetic ordering.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            LogicalType::Integer | LogicalType::BigInt | LogicalType::Double
        )
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::Boolean => "BOOLEAN",
            LogicalType::Integer => "INTEGER",
            LogicalType::BigInt => "BIGINT",
            LogicalType::Double => "DOUBLE",
            LogicalType::Varchar => "VARCHAR",
        };
        f.write_str(name)
    }
}

/// A single cell value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// 32-bit integer value.
    Integer(i32),
    /// 64-bit integer value.
    BigInt(i64),
    /// Double precision value.
    Double(f64),
    /// String value.
    Varchar(String),
}

impl Value {
    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Logical type of a non-null value.
    pub fn logical_type(&self) -> Option<LogicalType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(LogicalType::Boolean),
            Value::Integer(_) => Some(LogicalType::Integer),
            Value::BigInt(_) => Some(LogicalType::BigInt),
            Value::Double(_) => Some(LogicalType::Double),
            Value::Varchar(_) => Some(LogicalType::Varchar),
        }
    }

    /// Returns true when the value can be stored in a column of `ty`.
    pub fn conforms_to(&self, ty: LogicalType) -> bool {
        self.logical_type().map_or(true, |own| own == ty)
    }

    /// Reads the value as a row id.
    pub fn as_row_id(&self) -> Option<u64> {
        match self {
            Value::BigInt(v) if *v >= 0 => Some(*v as u64),
            Value::Integer(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Compares two non-null values.
    ///
    /// Numeric types compare after promotion; doubles use a total order so
    /// NaN sorts above every other number. Returns `None` for nulls and for
    /// values of unrelated types.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Varchar(a), Value::Varchar(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => Some(a.total_cmp(b)),
            (Value::Double(a), b) => b.as_i64().map(|b| a.total_cmp(&(b as f64))),
            (a, Value::Double(b)) => a.as_i64().map(|a| (a as f64).total_cmp(b)),
            (a, b) => match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => None,
            },
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Varchar(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::BigInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Varchar(value.to_owned())
    }
}
