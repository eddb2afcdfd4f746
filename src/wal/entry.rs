use crate::codec::{BlockType, FieldValue, Value};
use crate::encoding::{self, Decode, Encode, EncodingError};

/// One record of a cache WAL file.
#[derive(Debug, Clone, PartialEq)]
pub enum WalEntry {
    /// Values written per series+field key.
    Write { values: Vec<(Vec<u8>, Vec<Value>)> },
    /// Drop every value of `keys`.
    Delete { keys: Vec<Vec<u8>> },
    /// Drop the values of `keys` with timestamps in `[min, max]`.
    DeleteRange {
        keys: Vec<Vec<u8>>,
        min: i64,
        max: i64,
    },
}

const TAG_WRITE: u8 = 1;
const TAG_DELETE: u8 = 2;
const TAG_DELETE_RANGE: u8 = 3;

impl Encode for WalEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            WalEntry::Write { values } => {
                TAG_WRITE.encode_to(buf)?;
                encoding::encode_vec(values, buf)?;
            }
            WalEntry::Delete { keys } => {
                TAG_DELETE.encode_to(buf)?;
                encoding::encode_vec(keys, buf)?;
            }
            WalEntry::DeleteRange { keys, min, max } => {
                TAG_DELETE_RANGE.encode_to(buf)?;
                encoding::encode_vec(keys, buf)?;
                min.encode_to(buf)?;
                max.encode_to(buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for WalEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut off) = u8::decode_from(buf)?;
        match tag {
            TAG_WRITE => {
                let (values, n) = encoding::decode_vec::<(Vec<u8>, Vec<Value>)>(&buf[off..])?;
                off += n;
                Ok((WalEntry::Write { values }, off))
            }
            TAG_DELETE => {
                let (keys, n) = encoding::decode_vec::<Vec<u8>>(&buf[off..])?;
                off += n;
                Ok((WalEntry::Delete { keys }, off))
            }
            TAG_DELETE_RANGE => {
                let (keys, n) = encoding::decode_vec::<Vec<u8>>(&buf[off..])?;
                off += n;
                let (min, n) = i64::decode_from(&buf[off..])?;
                off += n;
                let (max, n) = i64::decode_from(&buf[off..])?;
                off += n;
                Ok((WalEntry::DeleteRange { keys, min, max }, off))
            }
            other => Err(EncodingError::InvalidTag {
                tag: u32::from(other),
                type_name: "WalEntry",
            }),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Series values: [key][u32 count][value]...
// ------------------------------------------------------------------------------------------------

impl Encode for (Vec<u8>, Vec<Value>) {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.0.encode_to(buf)?;
        encoding::encode_vec(&self.1, buf)
    }
}

impl Decode for (Vec<u8>, Vec<Value>) {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (key, n) = Vec::<u8>::decode_from(buf)?;
        let (values, m) = encoding::decode_vec::<Value>(&buf[n..])?;
        Ok(((key, values), n + m))
    }
}

// ------------------------------------------------------------------------------------------------
// Value: [unix_nano i64][block type u8][payload]
// ------------------------------------------------------------------------------------------------

impl Encode for Value {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.unix_nano.encode_to(buf)?;
        (self.value.block_type() as u8).encode_to(buf)?;
        match &self.value {
            FieldValue::Float(v) => v.encode_to(buf),
            FieldValue::Integer(v) => v.encode_to(buf),
            FieldValue::Unsigned(v) => v.encode_to(buf),
            FieldValue::Boolean(v) => v.encode_to(buf),
            FieldValue::String(v) => v.encode_to(buf),
        }
    }
}

impl Decode for Value {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (unix_nano, mut off) = i64::decode_from(buf)?;
        let (marker, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let rest = &buf[off..];
        let (value, n) = match BlockType::from_u8(marker) {
            Some(BlockType::Float) => f64::decode_from(rest).map(|(v, n)| (FieldValue::Float(v), n))?,
            Some(BlockType::Integer) => {
                i64::decode_from(rest).map(|(v, n)| (FieldValue::Integer(v), n))?
            }
            Some(BlockType::Unsigned) => {
                u64::decode_from(rest).map(|(v, n)| (FieldValue::Unsigned(v), n))?
            }
            Some(BlockType::Boolean) => {
                bool::decode_from(rest).map(|(v, n)| (FieldValue::Boolean(v), n))?
            }
            Some(BlockType::String) => {
                Vec::<u8>::decode_from(rest).map(|(v, n)| (FieldValue::String(v), n))?
            }
            None => {
                return Err(EncodingError::InvalidTag {
                    tag: u32::from(marker),
                    type_name: "FieldValue",
                });
            }
        };
        off += n;
        Ok((Value::new(unix_nano, value), off))
    }
}
