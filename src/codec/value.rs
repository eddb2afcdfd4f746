//! Timestamped values as they come out of a block.

use std::fmt;

use super::BlockType;

/// One `(timestamp, value)` pair of a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue<T> {
    /// Nanoseconds since the Unix epoch.
    pub unix_nano: i64,
    pub value: T,
}

impl<T> TypedValue<T> {
    pub fn new(unix_nano: i64, value: T) -> Self {
        Self { unix_nano, value }
    }
}

pub type FloatValue = TypedValue<f64>;
pub type IntegerValue = TypedValue<i64>;
pub type UnsignedValue = TypedValue<u64>;
pub type BooleanValue = TypedValue<bool>;
pub type StringValue = TypedValue<Vec<u8>>;

/// A field value of any supported type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Unsigned(u64),
    Boolean(bool),
    String(Vec<u8>),
}

impl FieldValue {
    pub fn block_type(&self) -> BlockType {
        match self {
            FieldValue::Float(_) => BlockType::Float,
            FieldValue::Integer(_) => BlockType::Integer,
            FieldValue::Unsigned(_) => BlockType::Unsigned,
            FieldValue::Boolean(_) => BlockType::Boolean,
            FieldValue::String(_) => BlockType::String,
        }
    }

    /// Approximate in-memory footprint of the payload in bytes.
    pub fn size(&self) -> usize {
        match self {
            FieldValue::Float(_) | FieldValue::Integer(_) | FieldValue::Unsigned(_) => 8,
            FieldValue::Boolean(_) => 1,
            FieldValue::String(s) => s.len(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}i"),
            FieldValue::Unsigned(v) => write!(f, "{v}u"),
            FieldValue::Boolean(v) => write!(f, "{v}"),
            FieldValue::String(v) => write!(f, "{:?}", String::from_utf8_lossy(v)),
        }
    }
}

/// A timestamped value of any supported type.
pub type Value = TypedValue<FieldValue>;

impl Value {
    pub fn float(unix_nano: i64, v: f64) -> Self {
        Self::new(unix_nano, FieldValue::Float(v))
    }

    pub fn integer(unix_nano: i64, v: i64) -> Self {
        Self::new(unix_nano, FieldValue::Integer(v))
    }

    pub fn unsigned(unix_nano: i64, v: u64) -> Self {
        Self::new(unix_nano, FieldValue::Unsigned(v))
    }

    pub fn boolean(unix_nano: i64, v: bool) -> Self {
        Self::new(unix_nano, FieldValue::Boolean(v))
    }

    pub fn string(unix_nano: i64, v: impl Into<Vec<u8>>) -> Self {
        Self::new(unix_nano, FieldValue::String(v.into()))
    }

    pub fn block_type(&self) -> BlockType {
        self.value.block_type()
    }

    /// Approximate footprint including the timestamp; used for cache
    /// accounting.
    pub fn size(&self) -> usize {
        8 + self.value.size()
    }
}

/// Columnar form of a block: parallel timestamp and value vectors.
///
/// Decoding into an existing array reuses its allocations.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeArray<T> {
    pub timestamps: Vec<i64>,
    pub values: Vec<T>,
}

impl<T> TimeArray<T> {
    pub fn new() -> Self {
        Self {
            timestamps: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timestamps: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn clear(&mut self) {
        self.timestamps.clear();
        self.values.clear();
    }

    pub fn min_time(&self) -> Option<i64> {
        self.timestamps.first().copied()
    }

    pub fn max_time(&self) -> Option<i64> {
        self.timestamps.last().copied()
    }
}

impl<T> Default for TimeArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> TimeArray<T> {
    /// Row form of the array.
    pub fn to_values(&self) -> Vec<TypedValue<T>> {
        self.timestamps
            .iter()
            .zip(&self.values)
            .map(|(&ts, v)| TypedValue::new(ts, v.clone()))
            .collect()
    }
}

pub type FloatArray = TimeArray<f64>;
pub type IntegerArray = TimeArray<i64>;
pub type UnsignedArray = TimeArray<u64>;
pub type BooleanArray = TimeArray<bool>;
pub type StringArray = TimeArray<Vec<u8>>;
