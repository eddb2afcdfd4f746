//! Typed block codec.
//!
//! A block holds the timestamps and values of one field, compressed
//! independently. Every value type shares the same framing:
//!
//! ```text
//! [type marker u8][scheme u8][count uvarint][ts_len uvarint][timestamps][values]
//! ```
//!
//! The scheme byte carries the timestamp encoding in its high nibble and
//! the value encoding in its low nibble. Any unknown marker or nibble, a
//! truncated payload, leftover bytes, or a count that disagrees with the
//! payload is reported as [`CodecError::CorruptBlock`].
//!
//! Decoding never rounds: floats and integers come back bit for bit and
//! strings byte for byte.

mod boolean;
mod float;
mod integer;
mod string;
mod timestamp;
mod value;

#[cfg(test)]
mod tests;

use std::fmt;

use thiserror::Error;

use crate::encoding::{EncodingError, get_uvarint, put_uvarint};

pub use value::{
    BooleanArray, BooleanValue, FieldValue, FloatArray, FloatValue, IntegerArray, IntegerValue,
    StringArray, StringValue, TimeArray, TypedValue, UnsignedArray, UnsignedValue, Value,
};

/// Upper bound on the number of values a decoder accepts in one block.
pub const MAX_BLOCK_COUNT: usize = 1 << 24;

// ------------------------------------------------------------------------------------------------
// Errors
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("corrupt block: {0}")]
    CorruptBlock(String),

    #[error("block type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: BlockType,
        found: BlockType,
    },

    #[error("cannot encode an empty value list without a block type")]
    Empty,
}

impl From<EncodingError> for CodecError {
    fn from(e: EncodingError) -> Self {
        CodecError::CorruptBlock(e.to_string())
    }
}

pub(crate) fn corrupt(msg: impl Into<String>) -> CodecError {
    CodecError::CorruptBlock(msg.into())
}

// ------------------------------------------------------------------------------------------------
// Markers
// ------------------------------------------------------------------------------------------------

/// Value type of a block, stored as its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockType {
    Float = 0,
    Integer = 1,
    Boolean = 2,
    String = 3,
    Unsigned = 4,
}

impl BlockType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlockType::Float),
            1 => Some(BlockType::Integer),
            2 => Some(BlockType::Boolean),
            3 => Some(BlockType::String),
            4 => Some(BlockType::Unsigned),
            _ => None,
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockType::Float => "float",
            BlockType::Integer => "integer",
            BlockType::Boolean => "boolean",
            BlockType::String => "string",
            BlockType::Unsigned => "unsigned",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimestampEncoding {
    /// 8-byte little-endian values.
    Raw = 0,
    /// First value, then wrapping deltas; all zigzag varints.
    Delta = 1,
    /// First value and one constant interval.
    RunLength = 2,
}

impl TimestampEncoding {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(TimestampEncoding::Raw),
            1 => Some(TimestampEncoding::Delta),
            2 => Some(TimestampEncoding::RunLength),
            _ => None,
        }
    }
}

/// Value column encoding. `Packed` is the compressed form specific to each
/// type: Gorilla XOR for floats, zigzag deltas for integers, one bit per
/// boolean, front coding for strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueEncoding {
    Raw = 0,
    Packed = 1,
}

impl ValueEncoding {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(ValueEncoding::Raw),
            1 => Some(ValueEncoding::Packed),
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Per-type column codecs
// ------------------------------------------------------------------------------------------------

/// A value type that can be stored in a block.
pub trait BlockValue: Clone + Send + Sync + Sized + 'static {
    const BLOCK_TYPE: BlockType;

    /// Append the value column to `buf`.
    fn encode_column(values: &[Self], encoding: ValueEncoding, buf: &mut Vec<u8>);

    /// Decode exactly `count` values, consuming all of `buf`.
    fn decode_column(
        buf: &[u8],
        encoding: ValueEncoding,
        count: usize,
        out: &mut Vec<Self>,
    ) -> Result<(), CodecError>;

    fn into_field(self) -> FieldValue;

    fn from_field(field: &FieldValue) -> Option<Self>;
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

struct BlockHeader<'a> {
    block_type: BlockType,
    ts_encoding: TimestampEncoding,
    value_encoding: ValueEncoding,
    count: usize,
    timestamps: &'a [u8],
    values: &'a [u8],
}

fn parse_header(block: &[u8]) -> Result<BlockHeader<'_>, CodecError> {
    if block.len() < 2 {
        return Err(corrupt(format!("block too short: {} bytes", block.len())));
    }
    let block_type = BlockType::from_u8(block[0])
        .ok_or_else(|| corrupt(format!("unknown block type marker 0x{:02X}", block[0])))?;
    let scheme = block[1];
    let ts_encoding = TimestampEncoding::from_u8(scheme >> 4)
        .ok_or_else(|| corrupt(format!("unknown timestamp encoding in scheme 0x{scheme:02X}")))?;
    let value_encoding = ValueEncoding::from_u8(scheme & 0x0F)
        .ok_or_else(|| corrupt(format!("unknown value encoding in scheme 0x{scheme:02X}")))?;

    let mut pos = 2;
    let (count, n) = get_uvarint(&block[pos..])?;
    pos += n;
    let count = usize::try_from(count)
        .ok()
        .filter(|c| *c <= MAX_BLOCK_COUNT)
        .ok_or_else(|| corrupt(format!("block value count {count} out of range")))?;

    let (ts_len, n) = get_uvarint(&block[pos..])?;
    pos += n;
    let ts_end = usize::try_from(ts_len)
        .ok()
        .and_then(|len| pos.checked_add(len))
        .filter(|end| *end <= block.len())
        .ok_or_else(|| corrupt(format!("timestamp section of {ts_len} bytes overruns block")))?;

    Ok(BlockHeader {
        block_type,
        ts_encoding,
        value_encoding,
        count,
        timestamps: &block[pos..ts_end],
        values: &block[ts_end..],
    })
}

/// Value type recorded in a block's marker byte.
pub fn block_type(block: &[u8]) -> Result<BlockType, CodecError> {
    let marker = *block.first().ok_or_else(|| corrupt("empty block"))?;
    BlockType::from_u8(marker)
        .ok_or_else(|| corrupt(format!("unknown block type marker 0x{marker:02X}")))
}

/// Number of values stored in a block, read from the header only.
pub fn block_count(block: &[u8]) -> Result<usize, CodecError> {
    Ok(parse_header(block)?.count)
}

// ------------------------------------------------------------------------------------------------
// Encoding
// ------------------------------------------------------------------------------------------------

fn encode_columns<T: BlockValue>(
    timestamps: &[i64],
    values: &[T],
    ts_encoding: TimestampEncoding,
    value_encoding: ValueEncoding,
) -> Vec<u8> {
    let mut ts_buf = Vec::with_capacity(timestamps.len() * 2);
    timestamp::encode(timestamps, ts_encoding, &mut ts_buf);

    let mut block = Vec::with_capacity(16 + ts_buf.len() + values.len() * 2);
    block.push(T::BLOCK_TYPE as u8);
    block.push(((ts_encoding as u8) << 4) | value_encoding as u8);
    put_uvarint(&mut block, timestamps.len() as u64);
    put_uvarint(&mut block, ts_buf.len() as u64);
    block.extend_from_slice(&ts_buf);
    T::encode_column(values, value_encoding, &mut block);
    block
}

/// Encode a typed sequence with the default encodings: packed values and
/// run-length or delta timestamps, whichever fits.
pub fn encode_block<T: BlockValue>(values: &[TypedValue<T>]) -> Vec<u8> {
    let timestamps: Vec<i64> = values.iter().map(|v| v.unix_nano).collect();
    let column: Vec<T> = values.iter().map(|v| v.value.clone()).collect();
    let ts_encoding = timestamp::choose(&timestamps);
    encode_columns(&timestamps, &column, ts_encoding, ValueEncoding::Packed)
}

/// Encode a typed sequence with explicit encodings.
pub fn encode_block_with<T: BlockValue>(
    values: &[TypedValue<T>],
    ts_encoding: TimestampEncoding,
    value_encoding: ValueEncoding,
) -> Vec<u8> {
    let timestamps: Vec<i64> = values.iter().map(|v| v.unix_nano).collect();
    let column: Vec<T> = values.iter().map(|v| v.value.clone()).collect();
    encode_columns(&timestamps, &column, ts_encoding, value_encoding)
}

/// Encode a columnar array with the default encodings.
pub fn encode_array_block<T: BlockValue>(array: &TimeArray<T>) -> Result<Vec<u8>, CodecError> {
    if array.timestamps.len() != array.values.len() {
        return Err(corrupt(format!(
            "array has {} timestamps but {} values",
            array.timestamps.len(),
            array.values.len()
        )));
    }
    let ts_encoding = timestamp::choose(&array.timestamps);
    Ok(encode_columns(
        &array.timestamps,
        &array.values,
        ts_encoding,
        ValueEncoding::Packed,
    ))
}

fn encode_fields<T: BlockValue>(values: &[Value]) -> Result<Vec<u8>, CodecError> {
    let mut typed = Vec::with_capacity(values.len());
    for v in values {
        let field = T::from_field(&v.value).ok_or(CodecError::TypeMismatch {
            expected: T::BLOCK_TYPE,
            found: v.value.block_type(),
        })?;
        typed.push(TypedValue::new(v.unix_nano, field));
    }
    Ok(encode_block(&typed))
}

/// Encode generic values. All values must share the type of the first one.
pub fn encode_values(values: &[Value]) -> Result<Vec<u8>, CodecError> {
    let first = values.first().ok_or(CodecError::Empty)?;
    match first.block_type() {
        BlockType::Float => encode_fields::<f64>(values),
        BlockType::Integer => encode_fields::<i64>(values),
        BlockType::Unsigned => encode_fields::<u64>(values),
        BlockType::Boolean => encode_fields::<bool>(values),
        BlockType::String => encode_fields::<Vec<u8>>(values),
    }
}

// ------------------------------------------------------------------------------------------------
// Decoding
// ------------------------------------------------------------------------------------------------

fn decode_header_as<T: BlockValue>(block: &[u8]) -> Result<BlockHeader<'_>, CodecError> {
    let header = parse_header(block)?;
    if header.block_type != T::BLOCK_TYPE {
        return Err(CodecError::TypeMismatch {
            expected: T::BLOCK_TYPE,
            found: header.block_type,
        });
    }
    Ok(header)
}

/// Decode a block into `out`, replacing its contents.
pub fn decode_block<T: BlockValue>(
    block: &[u8],
    out: &mut Vec<TypedValue<T>>,
) -> Result<(), CodecError> {
    let mut array = TimeArray::with_capacity(0);
    decode_array_block(block, &mut array)?;
    out.clear();
    out.reserve(array.len());
    out.extend(
        array
            .timestamps
            .into_iter()
            .zip(array.values)
            .map(|(ts, v)| TypedValue::new(ts, v)),
    );
    Ok(())
}

/// Decode a block straight into a columnar array, replacing its contents
/// and reusing its capacity.
pub fn decode_array_block<T: BlockValue>(
    block: &[u8],
    out: &mut TimeArray<T>,
) -> Result<(), CodecError> {
    let header = decode_header_as::<T>(block)?;
    out.clear();
    timestamp::decode(
        header.timestamps,
        header.ts_encoding,
        header.count,
        &mut out.timestamps,
    )?;
    T::decode_column(
        header.values,
        header.value_encoding,
        header.count,
        &mut out.values,
    )?;
    Ok(())
}

fn decode_fields<T: BlockValue>(block: &[u8], out: &mut Vec<Value>) -> Result<(), CodecError> {
    let mut array = TimeArray::<T>::new();
    decode_array_block(block, &mut array)?;
    out.clear();
    out.reserve(array.len());
    out.extend(
        array
            .timestamps
            .into_iter()
            .zip(array.values)
            .map(|(ts, v)| Value::new(ts, v.into_field())),
    );
    Ok(())
}

/// Decode a block of any type into generic values, replacing `out`.
pub fn decode_values(block: &[u8], out: &mut Vec<Value>) -> Result<(), CodecError> {
    match block_type(block)? {
        BlockType::Float => decode_fields::<f64>(block, out),
        BlockType::Integer => decode_fields::<i64>(block, out),
        BlockType::Unsigned => decode_fields::<u64>(block, out),
        BlockType::Boolean => decode_fields::<bool>(block, out),
        BlockType::String => decode_fields::<Vec<u8>>(block, out),
    }
}
