//! Little-endian binary encoding for the fixed-layout parts of the
//! on-disk formats: segment headers, footers and index sections, WAL
//! records, series-file records and index snapshots. Block payloads use the
//! varint helpers at the bottom of the module instead.
//!
//! Numbers are fixed width and little-endian, `f64` is stored as its bit
//! pattern, `bool` is one byte (`0` or `1`), `[u8; N]` is written raw.
//! Byte strings are `[u32 len][bytes]` and sequences `[u32 count][items]`.
//!
//! Decoding never panics. Lengths above [`MAX_BYTE_LEN`] and counts above
//! [`MAX_VEC_ELEMENTS`] are rejected before anything is allocated.


use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// Limits
// ------------------------------------------------------------------------------------------------

/// Longest byte string accepted by the decoder (256 MiB).
pub const MAX_BYTE_LEN: u32 = 256 * 1024 * 1024;

/// Largest sequence count accepted by [`decode_vec`].
pub const MAX_VEC_ELEMENTS: u32 = 16 * 1024 * 1024;

/// Longest possible LEB128 encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof { needed: usize, available: usize },

    /// Unknown discriminant of a hand-encoded enum.
    #[error("invalid tag {tag} for {type_name}")]
    InvalidTag { tag: u32, type_name: &'static str },

    #[error("invalid bool byte: 0x{0:02X}")]
    InvalidBool(u8),

    /// A length or count is above its limit or does not fit in `u32`.
    #[error("length overflow: {0}")]
    LengthOverflow(String),

    #[error("varint overflow")]
    VarintOverflow,

    #[error("{0}")]
    Custom(String),
}

// ------------------------------------------------------------------------------------------------
// Core traits
// ------------------------------------------------------------------------------------------------

/// Types with a fixed on-disk representation.
pub trait Encode {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError>;
}

/// Inverse of [`Encode`]. Returns the value and the number of bytes it
/// occupied so callers can walk a buffer of consecutive records.
pub trait Decode: Sized {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError>;
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

pub fn encode_to_vec<T: Encode>(value: &T) -> Result<Vec<u8>, EncodingError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

pub fn decode_from_slice<T: Decode>(buf: &[u8]) -> Result<(T, usize), EncodingError> {
    T::decode_from(buf)
}

fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn length_prefix(len: usize) -> Result<u32, EncodingError> {
    u32::try_from(len).map_err(|_| EncodingError::LengthOverflow(format!("{len} does not fit in u32")))
}

fn take_array<const N: usize>(buf: &[u8]) -> Result<[u8; N], EncodingError> {
    require(buf, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[..N]);
    Ok(out)
}

// ------------------------------------------------------------------------------------------------
// Fixed-width numbers
// ------------------------------------------------------------------------------------------------

impl Encode for u8 {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decode for u8 {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 1)?;
        Ok((buf[0], 1))
    }
}

macro_rules! impl_le_number {
    ($($ty:ty),*) => {
        $(
            impl Encode for $ty {
                fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
                    buf.extend_from_slice(&self.to_le_bytes());
                    Ok(())
                }
            }

            impl Decode for $ty {
                fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
                    const SIZE: usize = size_of::<$ty>();
                    Ok((<$ty>::from_le_bytes(take_array::<SIZE>(buf)?), SIZE))
                }
            }
        )*
    };
}

impl_le_number!(u32, u64, i64);

impl Encode for f64 {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.to_bits().encode_to(buf)
    }
}

impl Decode for f64 {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (bits, n) = u64::decode_from(buf)?;
        Ok((f64::from_bits(bits), n))
    }
}

impl Encode for bool {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.push(u8::from(*self));
        Ok(())
    }
}

impl Decode for bool {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        require(buf, 1)?;
        match buf[0] {
            0 => Ok((false, 1)),
            1 => Ok((true, 1)),
            other => Err(EncodingError::InvalidBool(other)),
        }
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(self);
        Ok(())
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Ok((take_array::<N>(buf)?, N))
    }
}

// ------------------------------------------------------------------------------------------------
// Byte strings
// ------------------------------------------------------------------------------------------------

impl Encode for Vec<u8> {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.as_slice().encode_to(buf)
    }
}

impl Decode for Vec<u8> {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (len, offset) = u32::decode_from(buf)?;
        if len > MAX_BYTE_LEN {
            return Err(EncodingError::LengthOverflow(format!(
                "byte string of {len} bytes"
            )));
        }
        let len = len as usize;
        require(&buf[offset..], len)?;
        Ok((buf[offset..offset + len].to_vec(), offset + len))
    }
}

impl Encode for &[u8] {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        length_prefix(self.len())?.encode_to(buf)?;
        buf.extend_from_slice(self);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Sequences
// ------------------------------------------------------------------------------------------------

/// Write `items` as `[u32 count][item]...`.
pub fn encode_vec<T: Encode>(items: &[T], buf: &mut Vec<u8>) -> Result<(), EncodingError> {
    length_prefix(items.len())?.encode_to(buf)?;
    for item in items {
        item.encode_to(buf)?;
    }
    Ok(())
}

/// Read a sequence written by [`encode_vec`].
pub fn decode_vec<T: Decode>(buf: &[u8]) -> Result<(Vec<T>, usize), EncodingError> {
    let (count, mut offset) = u32::decode_from(buf)?;
    if count > MAX_VEC_ELEMENTS {
        return Err(EncodingError::LengthOverflow(format!("sequence of {count} items")));
    }
    // Each item is at least one byte.
    let mut items = Vec::with_capacity((count as usize).min(buf.len() - offset));
    for _ in 0..count {
        let (item, consumed) = T::decode_from(&buf[offset..])?;
        offset += consumed;
        items.push(item);
    }
    Ok((items, offset))
}

// ------------------------------------------------------------------------------------------------
// Varints
// ------------------------------------------------------------------------------------------------

/// Map a signed integer onto an unsigned one so small magnitudes of either
/// sign produce short varints.
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Append `value` as an unsigned LEB128 varint.
#[inline]
pub fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Read an unsigned LEB128 varint from the front of `buf`.
///
/// Returns `(value, bytes_consumed)`.
#[inline]
pub fn get_uvarint(buf: &[u8]) -> Result<(u64, usize), EncodingError> {
    let mut result: u64 = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(EncodingError::VarintOverflow);
        }
        result |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        if i + 1 == MAX_VARINT_LEN {
            return Err(EncodingError::VarintOverflow);
        }
    }
    Err(EncodingError::UnexpectedEof {
        needed: buf.len() + 1,
        available: buf.len(),
    })
}

/// Append `value` as a zigzag varint.
#[inline]
pub fn put_varint(buf: &mut Vec<u8>, value: i64) {
    put_uvarint(buf, zigzag_encode(value));
}

/// Read a zigzag varint from the front of `buf`.
#[inline]
pub fn get_varint(buf: &[u8]) -> Result<(i64, usize), EncodingError> {
    let (raw, n) = get_uvarint(buf)?;
    Ok((zigzag_decode(raw), n))
}
