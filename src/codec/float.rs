//! Float column: raw IEEE bits or a Gorilla XOR bit stream.
//!
//! The XOR stream stores the first value in full, then for each value the
//! XOR with its predecessor:
//!
//! - `0`: identical to the previous value;
//! - `10` + bits: meaningful bits fit in the previous leading/trailing
//!   window;
//! - `11` + 6-bit leading zeros + 6-bit (length - 1) + bits: new window.
//!
//! Six bits for the leading count keep every pattern exact.

use bitvec::prelude::*;

use super::{BlockType, BlockValue, CodecError, FieldValue, ValueEncoding, corrupt};

impl BlockValue for f64 {
    const BLOCK_TYPE: BlockType = BlockType::Float;

    fn encode_column(values: &[Self], encoding: ValueEncoding, buf: &mut Vec<u8>) {
        match encoding {
            ValueEncoding::Raw => {
                for v in values {
                    buf.extend_from_slice(&v.to_bits().to_le_bytes());
                }
            }
            ValueEncoding::Packed => encode_xor(values, buf),
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
                if Some(buf.len()) != count.checked_mul(8) {
                    return Err(corrupt(format!(
                        "raw floats: {} bytes for {count} values",
                        buf.len()
                    )));
                }
                out.reserve(count);
                for chunk in buf.chunks_exact(8) {
                    let mut arr = [0u8; 8];
                    arr.copy_from_slice(chunk);
                    out.push(f64::from_bits(u64::from_le_bytes(arr)));
                }
                Ok(())
            }
            ValueEncoding::Packed => decode_xor(buf, count, out),
        }
    }

    fn into_field(self) -> FieldValue {
        FieldValue::Float(self)
    }

    fn from_field(field: &FieldValue) -> Option<Self> {
        match field {
            FieldValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

fn push_bits(bits: &mut BitVec<u8, Msb0>, value: u64, width: u32) {
    for i in (0..width).rev() {
        bits.push((value >> i) & 1 == 1);
    }
}

fn encode_xor(values: &[f64], buf: &mut Vec<u8>) {
    let Some((first, rest)) = values.split_first() else {
        return;
    };
    let mut bits = BitVec::<u8, Msb0>::with_capacity(64 + rest.len() * 16);
    let mut prev = first.to_bits();
    push_bits(&mut bits, prev, 64);

    let mut window: Option<(u32, u32)> = None;
    for v in rest {
        let cur = v.to_bits();
        let xor = prev ^ cur;
        prev = cur;
        if xor == 0 {
            bits.push(false);
            continue;
        }
        bits.push(true);

        let leading = xor.leading_zeros();
        let trailing = xor.trailing_zeros();
        match window {
            Some((lead, trail)) if leading >= lead && trailing >= trail => {
                bits.push(false);
                push_bits(&mut bits, xor >> trail, 64 - lead - trail);
            }
            _ => {
                let meaningful = 64 - leading - trailing;
                bits.push(true);
                push_bits(&mut bits, u64::from(leading), 6);
                push_bits(&mut bits, u64::from(meaningful - 1), 6);
                push_bits(&mut bits, xor >> trailing, meaningful);
                window = Some((leading, trailing));
            }
        }
    }
    buf.extend_from_slice(bits.as_raw_slice());
}

struct BitReader<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            bits: BitSlice::from_slice(buf),
            pos: 0,
        }
    }

    fn read_bit(&mut self) -> Result<bool, CodecError> {
        let bit = self
            .bits
            .get(self.pos)
            .map(|b| *b)
            .ok_or_else(|| corrupt("float stream truncated"))?;
        self.pos += 1;
        Ok(bit)
    }

    fn read_bits(&mut self, width: u32) -> Result<u64, CodecError> {
        let mut value = 0u64;
        for _ in 0..width {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value)
    }

    fn bytes_consumed(&self) -> usize {
        self.pos.div_ceil(8)
    }
}

fn decode_xor(buf: &[u8], count: usize, out: &mut Vec<f64>) -> Result<(), CodecError> {
    if count == 0 {
        if !buf.is_empty() {
            return Err(corrupt("float stream has bytes but no values"));
        }
        return Ok(());
    }
    // First value takes 64 bits, every other value at least one.
    if (count - 1).saturating_add(64) > buf.len().saturating_mul(8) {
        return Err(corrupt(format!(
            "float stream of {} bytes cannot hold {count} values",
            buf.len()
        )));
    }

    let mut reader = BitReader::new(buf);
    out.reserve(count);
    let mut prev = reader.read_bits(64)?;
    out.push(f64::from_bits(prev));

    let mut window: Option<(u32, u32)> = None;
    for _ in 1..count {
        if !reader.read_bit()? {
            out.push(f64::from_bits(prev));
            continue;
        }
        let (lead, trail) = if reader.read_bit()? {
            let lead = reader.read_bits(6)? as u32;
            let meaningful = reader.read_bits(6)? as u32 + 1;
            if lead + meaningful > 64 {
                return Err(corrupt("float window exceeds 64 bits"));
            }
            let w = (lead, 64 - lead - meaningful);
            window = Some(w);
            w
        } else {
            window.ok_or_else(|| corrupt("float window reused before being set"))?
        };
        let xor = reader.read_bits(64 - lead - trail)? << trail;
        prev ^= xor;
        out.push(f64::from_bits(prev));
    }

    if reader.bytes_consumed() != buf.len() {
        return Err(corrupt("float stream has trailing bytes"));
    }
    Ok(())
}
