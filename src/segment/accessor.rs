use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::{
    self, BooleanArray, BooleanValue, CodecError, FloatArray, FloatValue, IntegerArray,
    IntegerValue, StringArray, StringValue, UnsignedArray, UnsignedValue, Value,
};

use super::{CHECKSUM_SIZE, IndexEntry, SegmentError, ShardIndex, crc32};

/// Owner of a segment file's bytes.
///
/// Implementations decide how bytes are obtained (mapped, buffered, held
/// in memory) and provide the lifecycle calls plus [`with_block`]. Every
/// typed read is a provided method on top of `with_block`, so all strategies
/// decode identically.
///
/// Reads must bump the access counter before touching the bytes, fail with
/// [`SegmentError::OutOfRange`] when an entry does not fit the current
/// region, and fail with [`SegmentError::Closed`] once closed.
///
/// [`with_block`]: BlockAccessor::with_block
pub trait BlockAccessor: Send + Sync {
    /// Parse the file's index. Called once before any read.
    fn init(&self) -> Result<Arc<ShardIndex>, SegmentError>;

    /// Index built by [`init`](BlockAccessor::init).
    fn index(&self) -> Result<Arc<ShardIndex>, SegmentError>;

    /// Run `f` over the checksum-verified bytes of the block at `entry`
    /// (marker and payload, without the trailing checksum).
    fn with_block(
        &self,
        entry: &IndexEntry,
        f: &mut dyn FnMut(&[u8]) -> Result<(), CodecError>,
    ) -> Result<(), SegmentError>;

    /// Copy the block at `entry` into `buf` without decoding or verifying
    /// it, returning the stored checksum.
    fn read_bytes(&self, entry: &IndexEntry, buf: &mut Vec<u8>) -> Result<u32, SegmentError>;

    fn rename(&self, path: &Path) -> Result<(), SegmentError>;

    fn path(&self) -> PathBuf;

    /// File size in bytes.
    fn size(&self) -> u64;

    /// Release the bytes for good. Idempotent, also after `free`.
    fn close(&self) -> Result<(), SegmentError>;

    /// Release the bytes until the next read needs them again.
    fn free(&self) -> Result<(), SegmentError>;

    /// Number of block reads served so far.
    fn access_count(&self) -> u64;

    // --------------------------------------------------------------------------------------------
    // Provided reads
    // --------------------------------------------------------------------------------------------

    /// Values of the block of `key` whose time range covers `timestamp`.
    fn read(&self, key: &[u8], timestamp: i64) -> Result<Vec<Value>, SegmentError> {
        let index = self.index()?;
        let mut values = Vec::new();
        if let Some(entry) = index.entry_at(key, timestamp) {
            self.read_block(entry, &mut values)?;
        }
        Ok(values)
    }

    /// Every value of `key`, in time order.
    fn read_all(&self, key: &[u8]) -> Result<Vec<Value>, SegmentError> {
        let index = self.index()?;
        let Some(entries) = index.entries(key) else {
            return Ok(Vec::new());
        };
        let mut all = Vec::new();
        let mut block = Vec::new();
        for entry in entries {
            self.read_block(entry, &mut block)?;
            all.append(&mut block);
        }
        Ok(all)
    }

    fn read_block(&self, entry: &IndexEntry, out: &mut Vec<Value>) -> Result<(), SegmentError> {
        self.with_block(entry, &mut |b| codec::decode_values(b, out))
    }

    fn read_float_block(
        &self,
        entry: &IndexEntry,
        out: &mut Vec<FloatValue>,
    ) -> Result<(), SegmentError> {
        self.with_block(entry, &mut |b| codec::decode_block(b, out))
    }

    fn read_integer_block(
        &self,
        entry: &IndexEntry,
        out: &mut Vec<IntegerValue>,
    ) -> Result<(), SegmentError> {
        self.with_block(entry, &mut |b| codec::decode_block(b, out))
    }

    fn read_unsigned_block(
        &self,
        entry: &IndexEntry,
        out: &mut Vec<UnsignedValue>,
    ) -> Result<(), SegmentError> {
        self.with_block(entry, &mut |b| codec::decode_block(b, out))
    }

    fn read_string_block(
        &self,
        entry: &IndexEntry,
        out: &mut Vec<StringValue>,
    ) -> Result<(), SegmentError> {
        self.with_block(entry, &mut |b| codec::decode_block(b, out))
    }

    fn read_boolean_block(
        &self,
        entry: &IndexEntry,
        out: &mut Vec<BooleanValue>,
    ) -> Result<(), SegmentError> {
        self.with_block(entry, &mut |b| codec::decode_block(b, out))
    }

    fn read_float_array_block(
        &self,
        entry: &IndexEntry,
        out: &mut FloatArray,
    ) -> Result<(), SegmentError> {
        self.with_block(entry, &mut |b| codec::decode_array_block(b, out))
    }

    fn read_integer_array_block(
        &self,
        entry: &IndexEntry,
        out: &mut IntegerArray,
    ) -> Result<(), SegmentError> {
        self.with_block(entry, &mut |b| codec::decode_array_block(b, out))
    }

    fn read_unsigned_array_block(
        &self,
        entry: &IndexEntry,
        out: &mut UnsignedArray,
    ) -> Result<(), SegmentError> {
        self.with_block(entry, &mut |b| codec::decode_array_block(b, out))
    }

    fn read_string_array_block(
        &self,
        entry: &IndexEntry,
        out: &mut StringArray,
    ) -> Result<(), SegmentError> {
        self.with_block(entry, &mut |b| codec::decode_array_block(b, out))
    }

    fn read_boolean_array_block(
        &self,
        entry: &IndexEntry,
        out: &mut BooleanArray,
    ) -> Result<(), SegmentError> {
        self.with_block(entry, &mut |b| codec::decode_array_block(b, out))
    }
}

// ------------------------------------------------------------------------------------------------
// Shared byte-range helpers
// ------------------------------------------------------------------------------------------------

/// Slice out the block at `entry`, returning its content and stored
/// checksum. Fails with `OutOfRange` if the entry does not fit `data`.
pub(crate) fn block_bytes<'a>(
    data: &'a [u8],
    entry: &IndexEntry,
) -> Result<(&'a [u8], u32), SegmentError> {
    let out_of_range = || SegmentError::OutOfRange {
        offset: entry.offset,
        size: entry.size,
        len: data.len(),
    };
    let start = usize::try_from(entry.offset).map_err(|_| out_of_range())?;
    let size = entry.size as usize;
    let end = start
        .checked_add(size)
        .filter(|end| *end <= data.len())
        .ok_or_else(out_of_range)?;
    if size <= CHECKSUM_SIZE {
        return Err(SegmentError::CorruptBlock(format!(
            "block at offset {start} is only {size} bytes"
        )));
    }
    let split = end - CHECKSUM_SIZE;
    let mut crc = [0u8; CHECKSUM_SIZE];
    crc.copy_from_slice(&data[split..end]);
    Ok((&data[start..split], u32::from_le_bytes(crc)))
}

/// Like [`block_bytes`], additionally verifying the checksum.
pub(crate) fn verified_block<'a>(
    data: &'a [u8],
    entry: &IndexEntry,
) -> Result<&'a [u8], SegmentError> {
    let (content, stored) = block_bytes(data, entry)?;
    if crc32(content) != stored {
        return Err(SegmentError::CorruptBlock(format!(
            "checksum mismatch for block at offset {}",
            entry.offset
        )));
    }
    Ok(content)
}
