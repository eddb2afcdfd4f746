//! Segment file writer.
//!
//! Blocks are appended in the order they arrive; the index is buffered in
//! memory, sorted by key, and written with the bloom filter and footer by
//! [`SegmentWriter::finish`].
//!
//! # Atomicity
//!
//! 1. Write everything to `<path>.tsm.tmp`.
//! 2. Flush and sync the file.
//! 3. Rename to `<path>.tsm`.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions, rename};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bloomfilter::Bloom;
use tracing::debug;

use crate::codec::{self, BlockType, Value};
use crate::encoding;

use super::{
    BLOOM_FALSE_POSITIVE_RATE, BlockHandle, CHECKSUM_SIZE, IndexEntry, IndexRecord,
    MAX_BLOCK_VALUES, SEGMENT_FILE_EXTENSION, SEGMENT_HDR_SIZE, SegmentError, SegmentFooter,
    SegmentHeader, crc32,
};

/// Builds one segment file.
///
/// Keys may be written in any order, but the blocks of a single key must
/// arrive in ascending, non-overlapping time order.
pub struct SegmentWriter {
    final_path: PathBuf,
    tmp_path: PathBuf,
    writer: BufWriter<File>,
    offset: u64,
    records: BTreeMap<Vec<u8>, IndexRecord>,
}

impl SegmentWriter {
    /// Start a segment that will be published as `path` with the `tsm`
    /// extension.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SegmentError> {
        let final_path = path.as_ref().with_extension(SEGMENT_FILE_EXTENSION);
        let tmp_path = final_path.with_extension(format!("{SEGMENT_FILE_EXTENSION}.tmp"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        let mut writer = BufWriter::new(file);

        let header = encoding::encode_to_vec(&SegmentHeader::new()?)?;
        debug_assert_eq!(header.len(), SEGMENT_HDR_SIZE);
        writer.write_all(&header)?;

        Ok(Self {
            final_path,
            tmp_path,
            writer,
            offset: header.len() as u64,
            records: BTreeMap::new(),
        })
    }

    /// Encode `values` into blocks of at most [`MAX_BLOCK_VALUES`] and append
    /// them under `key`. Values must share one type and have strictly
    /// increasing timestamps. Nothing is written unless every block is
    /// accepted.
    pub fn write(&mut self, key: &[u8], values: &[Value]) -> Result<(), SegmentError> {
        if values.is_empty() {
            return Err(SegmentError::InvalidInput("no values to write".into()));
        }
        if values.windows(2).any(|w| w[0].unix_nano >= w[1].unix_nano) {
            return Err(SegmentError::InvalidInput(format!(
                "values of key {} are not in strictly increasing time order",
                String::from_utf8_lossy(key)
            )));
        }

        let mut blocks = Vec::with_capacity(values.len().div_ceil(MAX_BLOCK_VALUES));
        let mut block_type = None;
        for chunk in values.chunks(MAX_BLOCK_VALUES) {
            let block = codec::encode_values(chunk)?;
            let chunk_type = codec::block_type(&block)?;
            if block_type.is_some_and(|t| t != chunk_type) {
                return Err(SegmentError::InvalidInput(format!(
                    "values of key {} mix block types",
                    String::from_utf8_lossy(key)
                )));
            }
            block_type = Some(chunk_type);
            blocks.push((chunk[0].unix_nano, chunk[chunk.len() - 1].unix_nano, block));
        }
        if let Some(block_type) = block_type {
            self.check_append(key, block_type, values[0].unix_nano)?;
        }

        for (min, max, block) in &blocks {
            self.write_block(key, *min, *max, block)?;
        }
        Ok(())
    }

    /// Append an already-encoded block covering `[min_time, max_time]`.
    pub fn write_block(
        &mut self,
        key: &[u8],
        min_time: i64,
        max_time: i64,
        block: &[u8],
    ) -> Result<(), SegmentError> {
        let block_type = codec::block_type(block)?;
        if min_time > max_time {
            return Err(SegmentError::InvalidInput(format!(
                "min time {min_time} after max time {max_time}"
            )));
        }
        self.check_append(key, block_type, min_time)?;

        let size = u32::try_from(block.len() + CHECKSUM_SIZE)
            .map_err(|_| SegmentError::InvalidInput("block too large".into()))?;
        let offset = i64::try_from(self.offset)
            .map_err(|_| SegmentError::Internal("segment offset overflow".into()))?;
        self.writer.write_all(block)?;
        self.writer.write_all(&crc32(block).to_le_bytes())?;
        self.offset += u64::from(size);

        let entry = IndexEntry {
            offset,
            size,
            min_time,
            max_time,
        };
        self.records
            .entry(key.to_vec())
            .or_insert_with(|| IndexRecord {
                key: key.to_vec(),
                block_type,
                entries: Vec::new(),
            })
            .entries
            .push(entry);
        Ok(())
    }

    /// Number of distinct keys written so far.
    pub fn key_count(&self) -> usize {
        self.records.len()
    }

    /// Type of the blocks already written under `key`.
    pub fn block_type(&self, key: &[u8]) -> Option<BlockType> {
        self.records.get(key).map(|r| r.block_type)
    }

    /// Write index, bloom filter and footer, sync, and publish the file.
    pub fn finish(mut self) -> Result<PathBuf, SegmentError> {
        let records: Vec<IndexRecord> = std::mem::take(&mut self.records).into_values().collect();

        let mut index_bytes = Vec::new();
        encoding::encode_vec(&records, &mut index_bytes)?;
        let index = self.write_section(&index_bytes)?;

        let mut bloom: Bloom<[u8]> =
            Bloom::new_for_fp_rate(records.len().max(1), BLOOM_FALSE_POSITIVE_RATE)
                .map_err(|e| SegmentError::Internal(e.to_string()))?;
        for record in &records {
            bloom.set(record.key.as_slice());
        }
        let bloom = self.write_section(bloom.as_slice())?;

        let total_file_size = self.offset + super::SEGMENT_FOOTER_SIZE as u64;
        let footer = SegmentFooter {
            index,
            bloom,
            total_file_size,
            footer_crc32: 0,
        }
        .seal()?;
        self.writer.write_all(&encoding::encode_to_vec(&footer)?)?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        rename(&self.tmp_path, &self.final_path)?;

        debug!(
            path = %self.final_path.display(),
            keys = records.len(),
            size = total_file_size,
            "segment file written"
        );
        Ok(self.final_path)
    }

    /// Whether a block of `block_type` starting at `min_time` may follow
    /// the blocks already written under `key`.
    fn check_append(
        &self,
        key: &[u8],
        block_type: BlockType,
        min_time: i64,
    ) -> Result<(), SegmentError> {
        let Some(record) = self.records.get(key) else {
            return Ok(());
        };
        if record.block_type != block_type {
            return Err(SegmentError::InvalidInput(format!(
                "key {} already holds {} blocks, got {}",
                String::from_utf8_lossy(key),
                record.block_type,
                block_type
            )));
        }
        if record
            .entries
            .last()
            .is_some_and(|last| last.max_time >= min_time)
        {
            return Err(SegmentError::InvalidInput(format!(
                "block of key {} starting at {min_time} overlaps the previous one",
                String::from_utf8_lossy(key)
            )));
        }
        Ok(())
    }

    /// Write a `[len][bytes][crc]` section and return its handle.
    fn write_section(&mut self, data: &[u8]) -> Result<BlockHandle, SegmentError> {
        let len = u32::try_from(data.len())
            .map_err(|_| SegmentError::InvalidInput("section too large".into()))?;
        let handle = BlockHandle {
            offset: self.offset,
            size: data.len() as u64,
        };
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(data)?;
        self.writer.write_all(&crc32(data).to_le_bytes())?;
        self.offset += (super::SECTION_LEN_SIZE + data.len() + CHECKSUM_SIZE) as u64;
        Ok(handle)
    }
}
