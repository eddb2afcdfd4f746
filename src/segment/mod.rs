//! Segment (TSM) files: immutable, columnar, time-ordered blocks plus a
//! trailing key index.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER: magic "TSMS" | version u32 | crc32]
//! [BLOCK 0][BLOCK 1] ...              each block: [marker][payload][crc32 LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [BLOOM_LEN_LE][BLOOM_BYTES][BLOOM_CRC32_LE]
//! [FOOTER: index handle | bloom handle | total_file_size u64 | crc32]
//! ```
//!
//! An [`IndexEntry`] locates one block: its `offset` points at the block's
//! type marker and its `size` includes the trailing checksum. The index
//! section is a list of [`IndexRecord`]s sorted by key.
//!
//! # Reading
//!
//! A [`BlockAccessor`] owns the file bytes. [`MmapAccessor`] maps the file,
//! [`BufferedAccessor`] reads it into memory (or wraps bytes handed to it).
//! [`SegmentReader`] is the façade the rest of the crate uses; it puts one
//! reader/writer lock in front of the accessor so reads run in parallel and
//! close/rename/free are exclusive.
//!
//! # Writing
//!
//! [`SegmentWriter`] produces files in this format. It writes to a `.tmp`
//! path and renames on success, so a crash never leaves a partial segment
//! under its final name.

mod accessor;
mod buffered;
mod index;
mod mmap;
mod reader;
mod writer;

#[cfg(test)]
mod tests;

pub use accessor::BlockAccessor;
pub use buffered::BufferedAccessor;
pub use index::ShardIndex;
pub use mmap::MmapAccessor;
pub use reader::SegmentReader;
pub use writer::SegmentWriter;

use std::io;

use crc32fast::Hasher as Crc32;
use thiserror::Error;

use crate::codec::{BlockType, CodecError};
use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// File extension of segment files.
pub const SEGMENT_FILE_EXTENSION: &str = "tsm";

/// Maximum number of values the writer puts in one block.
pub const MAX_BLOCK_VALUES: usize = 1000;

const SEGMENT_MAGIC: [u8; 4] = *b"TSMS";
const SEGMENT_VERSION: u32 = 1;
const SEGMENT_HDR_SIZE: usize = 12;
const SEGMENT_FOOTER_SIZE: usize = 44;
const SECTION_LEN_SIZE: usize = 4;
const CHECKSUM_SIZE: usize = 4;
const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by segment reads, writes and lifecycle calls.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Header, footer or index section failed validation.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// A block failed its checksum or could not be decoded.
    #[error("corrupt block: {0}")]
    CorruptBlock(String),

    #[error("codec error: {0}")]
    Codec(CodecError),

    /// The accessor has been closed.
    #[error("segment file closed")]
    Closed,

    /// An entry's byte range lies outside the mapped region.
    #[error("block at offset {offset} with size {size} is outside the {len}-byte region")]
    OutOfRange { offset: i64, size: u32, len: usize },

    /// Writer misuse, e.g. out-of-order blocks.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CodecError> for SegmentError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::CorruptBlock(msg) => SegmentError::CorruptBlock(msg),
            other => SegmentError::Codec(other),
        }
    }
}

impl SegmentError {
    pub(crate) fn poisoned() -> Self {
        SegmentError::Internal("RwLock poisoned".into())
    }
}

// ------------------------------------------------------------------------------------------------
// Index entries
// ------------------------------------------------------------------------------------------------

/// Location and time range of one block inside a segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Byte offset of the block's type marker.
    pub offset: i64,
    /// Block length including the trailing checksum.
    pub size: u32,
    pub min_time: i64,
    pub max_time: i64,
}

impl IndexEntry {
    pub fn contains(&self, timestamp: i64) -> bool {
        self.min_time <= timestamp && timestamp <= self.max_time
    }

    pub fn overlaps(&self, min: i64, max: i64) -> bool {
        self.min_time <= max && self.max_time >= min
    }
}

/// All entries of one key, as stored in the index section.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub key: Vec<u8>,
    pub block_type: BlockType,
    pub entries: Vec<IndexEntry>,
}

// ------------------------------------------------------------------------------------------------
// On-disk format structures
// ------------------------------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct SegmentHeader {
    magic: [u8; 4],
    version: u32,
    header_crc: u32,
}

/// Offset and size of a `[len][bytes][crc]` section.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BlockHandle {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

#[derive(Debug)]
pub(crate) struct SegmentFooter {
    pub(crate) index: BlockHandle,
    pub(crate) bloom: BlockHandle,
    pub(crate) total_file_size: u64,
    pub(crate) footer_crc32: u32,
}

// ------------------------------------------------------------------------------------------------
// Encoding implementations
// ------------------------------------------------------------------------------------------------

impl Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)?;
        self.min_time.encode_to(buf)?;
        self.max_time.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (offset, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (min_time, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (max_time, n) = i64::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                offset,
                size,
                min_time,
                max_time,
            },
            off,
        ))
    }
}

impl Encode for IndexRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.key.encode_to(buf)?;
        (self.block_type as u8).encode_to(buf)?;
        encoding::encode_vec(&self.entries, buf)?;
        Ok(())
    }
}

impl Decode for IndexRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (key, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (marker, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let block_type = BlockType::from_u8(marker).ok_or(EncodingError::InvalidTag {
            tag: u32::from(marker),
            type_name: "BlockType",
        })?;
        let (entries, n) = encoding::decode_vec::<IndexEntry>(&buf[off..])?;
        off += n;
        Ok((
            Self {
                key,
                block_type,
                entries,
            },
            off,
        ))
    }
}

impl Encode for SegmentHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.header_crc.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for SegmentHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (header_crc, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                header_crc,
            },
            off,
        ))
    }
}

impl Encode for BlockHandle {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.offset.encode_to(buf)?;
        self.size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for BlockHandle {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (offset, n) = u64::decode_from(buf)?;
        let (size, m) = u64::decode_from(&buf[n..])?;
        Ok((Self { offset, size }, n + m))
    }
}

impl Encode for SegmentFooter {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.index.encode_to(buf)?;
        self.bloom.encode_to(buf)?;
        self.total_file_size.encode_to(buf)?;
        self.footer_crc32.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for SegmentFooter {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (index, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (bloom, n) = BlockHandle::decode_from(&buf[off..])?;
        off += n;
        let (total_file_size, n) = u64::decode_from(&buf[off..])?;
        off += n;
        let (footer_crc32, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                index,
                bloom,
                total_file_size,
                footer_crc32,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

pub(crate) fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

impl SegmentHeader {
    pub(crate) fn new() -> Result<Self, EncodingError> {
        let mut header = Self {
            magic: SEGMENT_MAGIC,
            version: SEGMENT_VERSION,
            header_crc: 0,
        };
        header.header_crc = crc32(&encoding::encode_to_vec(&header)?);
        Ok(header)
    }

    /// Check magic, version and checksum.
    pub(crate) fn verify(mut self) -> Result<(), SegmentError> {
        let stored = self.header_crc;
        self.header_crc = 0;
        if crc32(&encoding::encode_to_vec(&self)?) != stored {
            return Err(SegmentError::CorruptIndex("header checksum mismatch".into()));
        }
        if self.magic != SEGMENT_MAGIC {
            return Err(SegmentError::CorruptIndex("header magic mismatch".into()));
        }
        if self.version != SEGMENT_VERSION {
            return Err(SegmentError::CorruptIndex(format!(
                "unsupported segment version {}",
                self.version
            )));
        }
        Ok(())
    }
}

impl SegmentFooter {
    pub(crate) fn seal(mut self) -> Result<Self, EncodingError> {
        self.footer_crc32 = 0;
        self.footer_crc32 = crc32(&encoding::encode_to_vec(&self)?);
        Ok(self)
    }

    pub(crate) fn verify(&self) -> Result<(), SegmentError> {
        let zeroed = SegmentFooter {
            footer_crc32: 0,
            ..*self
        };
        if crc32(&encoding::encode_to_vec(&zeroed)?) != self.footer_crc32 {
            return Err(SegmentError::CorruptIndex("footer checksum mismatch".into()));
        }
        Ok(())
    }
}

/// Return the verified contents of the `[len][bytes][crc]` section at
/// `handle`, which must end at or before `limit`.
pub(crate) fn read_section<'a>(
    data: &'a [u8],
    handle: &BlockHandle,
    limit: usize,
) -> Result<&'a [u8], SegmentError> {
    let out_of_range = || {
        SegmentError::CorruptIndex(format!(
            "section at offset {} with size {} is out of range",
            handle.offset, handle.size
        ))
    };
    let start = usize::try_from(handle.offset).map_err(|_| out_of_range())?;
    let size = usize::try_from(handle.size).map_err(|_| out_of_range())?;
    let end = start
        .checked_add(SECTION_LEN_SIZE + CHECKSUM_SIZE)
        .and_then(|n| n.checked_add(size))
        .filter(|end| *end <= limit)
        .ok_or_else(out_of_range)?;

    let (len, _) = u32::decode_from(&data[start..])?;
    if len as usize != size {
        return Err(SegmentError::CorruptIndex(format!(
            "section length prefix {len} disagrees with handle size {size}"
        )));
    }
    let content = &data[start + SECTION_LEN_SIZE..end - CHECKSUM_SIZE];
    let (stored, _) = u32::decode_from(&data[end - CHECKSUM_SIZE..end])?;
    if crc32(content) != stored {
        return Err(SegmentError::CorruptIndex(format!(
            "section checksum mismatch at offset {start}"
        )));
    }
    Ok(content)
}
