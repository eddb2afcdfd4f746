use bitvec::prelude::*;

use super::{BlockType, BlockValue, CodecError, FieldValue, ValueEncoding, corrupt};

impl BlockValue for bool {
    const BLOCK_TYPE: BlockType = BlockType::Boolean;

    fn encode_column(values: &[Self], encoding: ValueEncoding, buf: &mut Vec<u8>) {
        match encoding {
            ValueEncoding::Raw => buf.extend(values.iter().map(|&v| u8::from(v))),
            ValueEncoding::Packed => {
                let bits: BitVec<u8, Msb0> = values.iter().copied().collect();
                buf.extend_from_slice(bits.as_raw_slice());
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
            ValueEncoding::Raw => {
                if buf.len() != count {
                    return Err(corrupt(format!(
                        "raw booleans: {} bytes for {count} values",
                        buf.len()
                    )));
                }
                out.reserve(count);
                for &b in buf {
                    match b {
                        0 => out.push(false),
                        1 => out.push(true),
                        other => return Err(corrupt(format!("invalid boolean byte 0x{other:02X}"))),
                    }
                }
            }
            ValueEncoding::Packed => {
                if buf.len() != count.div_ceil(8) {
                    return Err(corrupt(format!(
                        "packed booleans: {} bytes for {count} values",
                        buf.len()
                    )));
                }
                let bits = BitSlice::<u8, Msb0>::from_slice(buf);
                out.reserve(count);
                out.extend(bits[..count].iter().by_vals());
            }
        }
        Ok(())
    }

    fn into_field(self) -> FieldValue {
        FieldValue::Boolean(self)
    }

    fn from_field(field: &FieldValue) -> Option<Self> {
        match field {
            FieldValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }
}
