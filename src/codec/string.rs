//! String column. Values are arbitrary bytes and round-trip exactly.
//!
//! Raw form: `[uvarint len][bytes]` per value. Packed form front-codes each
//! value against its predecessor: `[uvarint shared][uvarint suffix_len][suffix]`.

use crate::encoding::{get_uvarint, put_uvarint};

use super::{BlockType, BlockValue, CodecError, FieldValue, ValueEncoding, corrupt};

fn shared_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Read a length-prefixed slice at `*pos`, advancing it.
fn read_len_prefixed<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8], CodecError> {
    let (len, n) = get_uvarint(&buf[*pos..])?;
    *pos += n;
    let end = usize::try_from(len)
        .ok()
        .and_then(|len| pos.checked_add(len))
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| corrupt(format!("string of {len} bytes overruns block")))?;
    let bytes = &buf[*pos..end];
    *pos = end;
    Ok(bytes)
}

impl BlockValue for Vec<u8> {
    const BLOCK_TYPE: BlockType = BlockType::String;

    fn encode_column(values: &[Self], encoding: ValueEncoding, buf: &mut Vec<u8>) {
        match encoding {
            ValueEncoding::Raw => {
                for v in values {
                    put_uvarint(buf, v.len() as u64);
                    buf.extend_from_slice(v);
                }
            }
            ValueEncoding::Packed => {
                let mut prev: &[u8] = &[];
                for v in values {
                    let shared = shared_prefix(prev, v);
                    put_uvarint(buf, shared as u64);
                    put_uvarint(buf, (v.len() - shared) as u64);
                    buf.extend_from_slice(&v[shared..]);
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
        if count > buf.len() {
            return Err(corrupt(format!(
                "strings: {} bytes cannot hold {count} values",
                buf.len()
            )));
        }
        out.reserve(count);
        let mut pos = 0;
        match encoding {
            ValueEncoding::Raw => {
                for _ in 0..count {
                    out.push(read_len_prefixed(buf, &mut pos)?.to_vec());
                }
            }
            ValueEncoding::Packed => {
                let start = out.len();
                for _ in 0..count {
                    let (shared, n) = get_uvarint(&buf[pos..])?;
                    pos += n;
                    let prev: &[u8] = match out.last() {
                        Some(prev) if out.len() > start => prev,
                        _ => &[],
                    };
                    let shared = usize::try_from(shared)
                        .ok()
                        .filter(|s| *s <= prev.len())
                        .ok_or_else(|| corrupt("string shares more bytes than its predecessor"))?;
                    let suffix = read_len_prefixed(buf, &mut pos)?;
                    let mut value = Vec::with_capacity(shared + suffix.len());
                    value.extend_from_slice(&prev[..shared]);
                    value.extend_from_slice(suffix);
                    out.push(value);
                }
            }
        }
        if pos != buf.len() {
            return Err(corrupt(format!("strings: {} trailing bytes", buf.len() - pos)));
        }
        Ok(())
    }

    fn into_field(self) -> FieldValue {
        FieldValue::String(self)
    }

    fn from_field(field: &FieldValue) -> Option<Self> {
        match field {
            FieldValue::String(v) => Some(v.clone()),
            _ => None,
        }
    }
}
