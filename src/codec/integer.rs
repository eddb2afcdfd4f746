//! Signed and unsigned integer columns.
//!
//! Packed form: the first value then wrapping deltas, each a zigzag
//! varint. Wrapping arithmetic keeps the full 64-bit range exact.

use crate::encoding::{get_varint, put_varint};

use super::{BlockType, BlockValue, CodecError, FieldValue, ValueEncoding, corrupt};

fn decode_raw(buf: &[u8], count: usize, mut push: impl FnMut([u8; 8])) -> Result<(), CodecError> {
    if Some(buf.len()) != count.checked_mul(8) {
        return Err(corrupt(format!(
            "raw integers: {} bytes for {count} values",
            buf.len()
        )));
    }
    for chunk in buf.chunks_exact(8) {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(chunk);
        push(arr);
    }
    Ok(())
}

fn decode_deltas(
    buf: &[u8],
    count: usize,
    mut push: impl FnMut(i64),
) -> Result<(), CodecError> {
    if count > buf.len() {
        return Err(corrupt(format!(
            "packed integers: {} bytes cannot hold {count} values",
            buf.len()
        )));
    }
    let mut pos = 0;
    for _ in 0..count {
        let (delta, n) = get_varint(&buf[pos..])?;
        pos += n;
        push(delta);
    }
    if pos != buf.len() {
        return Err(corrupt(format!(
            "packed integers: {} trailing bytes",
            buf.len() - pos
        )));
    }
    Ok(())
}

impl BlockValue for i64 {
    const BLOCK_TYPE: BlockType = BlockType::Integer;

    fn encode_column(values: &[Self], encoding: ValueEncoding, buf: &mut Vec<u8>) {
        match encoding {
            ValueEncoding::Raw => {
                for v in values {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
            }
            ValueEncoding::Packed => {
                let mut prev = 0i64;
                for &v in values {
                    put_varint(buf, v.wrapping_sub(prev));
                    prev = v;
                }
            }
        }
    }

    fn decode_column(
        buf: &[u8],
        encoding: ValueEncoding,
        count: usize,
        out: &mut Vec<Self>,
    ) -> Result<(), CodecError> {
        match encoding {
            ValueEncoding::Raw => decode_raw(buf, count, |b| out.push(i64::from_le_bytes(b))),
            ValueEncoding::Packed => {
                out.reserve(count);
                let mut prev = 0i64;
                decode_deltas(buf, count, |delta| {
                    prev = prev.wrapping_add(delta);
                    out.push(prev);
                })
            }
        }
    }

    fn into_field(self) -> FieldValue {
        FieldValue::Integer(self)
    }

    fn from_field(field: &FieldValue) -> Option<Self> {
        match field {
            FieldValue::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl BlockValue for u64 {
    const BLOCK_TYPE: BlockType = BlockType::Unsigned;

    fn encode_column(values: &[Self], encoding: ValueEncoding, buf: &mut Vec<u8>) {
        match encoding {
            ValueEncoding::Raw => {
                for v in values {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
            }
            ValueEncoding::Packed => {
                let mut prev = 0u64;
                for &v in values {
                    put_varint(buf, v.wrapping_sub(prev) as i64);
                    prev = v;
                }
            }
        }
    }

    fn decode_column(
        buf: &[u8],
        encoding: ValueEncoding,
        count: usize,
        out: &mut Vec<Self>,
    ) -> Result<(), CodecError> {
        match encoding {
            ValueEncoding::Raw => decode_raw(buf, count, |b| out.push(u64::from_le_bytes(b))),
            ValueEncoding::Packed => {
                out.reserve(count);
                let mut prev = 0u64;
                decode_deltas(buf, count, |delta| {
                    prev = prev.wrapping_add(delta as u64);
                    out.push(prev);
                })
            }
        }
    }

    fn into_field(self) -> FieldValue {
        FieldValue::Unsigned(self)
    }

    fn from_field(field: &FieldValue) -> Option<Self> {
        match field {
            FieldValue::Unsigned(v) => Some(*v),
            _ => None,
        }
    }
}
