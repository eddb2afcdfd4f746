use std::fmt;

use bloomfilter::Bloom;
use tracing::trace;

use crate::codec::BlockType;
use crate::encoding::{self, Decode};

use super::{
    CHECKSUM_SIZE, IndexEntry, IndexRecord, SEGMENT_FOOTER_SIZE, SEGMENT_HDR_SIZE, SegmentError,
    SegmentFooter, SegmentHeader, read_section,
};

/// Smallest valid block: type marker plus checksum.
const MIN_BLOCK_SIZE: u32 = 1 + CHECKSUM_SIZE as u32;

/// Key → block locations for one segment file.
///
/// Built once from the file's trailer and immutable afterwards; readers
/// share it through an `Arc`.
pub struct ShardIndex {
    records: Vec<IndexRecord>,
    bloom: Option<Bloom<[u8]>>,
    time_range: Option<(i64, i64)>,
}

impl fmt::Debug for ShardIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardIndex")
            .field("keys", &self.records.len())
            .field("time_range", &self.time_range)
            .field("bloom", &self.bloom.is_some())
            .finish()
    }
}

fn corrupt(msg: impl Into<String>) -> SegmentError {
    SegmentError::CorruptIndex(msg.into())
}

impl ShardIndex {
    /// Parse and validate the header, footer and index of a whole segment
    /// file image. Every structural problem is reported as `CorruptIndex`.
    pub(crate) fn parse(data: &[u8]) -> Result<Self, SegmentError> {
        if data.len() < SEGMENT_HDR_SIZE + SEGMENT_FOOTER_SIZE {
            return Err(corrupt(format!("file too small: {} bytes", data.len())));
        }

        let (header, _) = encoding::decode_from_slice::<SegmentHeader>(&data[..SEGMENT_HDR_SIZE])
            .map_err(|e| corrupt(format!("header: {e}")))?;
        header.verify()?;

        let footer_start = data.len() - SEGMENT_FOOTER_SIZE;
        let (footer, _) = SegmentFooter::decode_from(&data[footer_start..])
            .map_err(|e| corrupt(format!("footer: {e}")))?;
        footer.verify()?;
        if footer.total_file_size != data.len() as u64 {
            return Err(corrupt(format!(
                "footer records {} bytes but file has {}",
                footer.total_file_size,
                data.len()
            )));
        }

        let index_bytes = read_section(data, &footer.index, footer_start)?;
        let (records, consumed) = encoding::decode_vec::<IndexRecord>(index_bytes)
            .map_err(|e| corrupt(format!("index section: {e}")))?;
        if consumed != index_bytes.len() {
            return Err(corrupt("index section has trailing bytes"));
        }

        let blocks_end = footer.index.offset;
        let time_range = validate_records(&records, blocks_end)?;

        let bloom = if footer.bloom.size == 0 {
            None
        } else {
            let bytes = read_section(data, &footer.bloom, footer_start)?;
            Some(Bloom::from_slice(bytes).map_err(|e| corrupt(format!("bloom filter: {e}")))?)
        };

        trace!(keys = records.len(), ?time_range, "segment index parsed");
        Ok(Self {
            records,
            bloom,
            time_range,
        })
    }

    pub fn key_count(&self) -> usize {
        self.records.len()
    }

    /// Key and block type at position `i` in key order.
    pub fn key_at(&self, i: usize) -> Option<(&[u8], BlockType)> {
        self.records
            .get(i)
            .map(|r| (r.key.as_slice(), r.block_type))
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.records.iter().map(|r| r.key.as_slice())
    }

    fn find(&self, key: &[u8]) -> Option<&IndexRecord> {
        self.records
            .binary_search_by(|r| r.key.as_slice().cmp(key))
            .ok()
            .map(|i| &self.records[i])
    }

    /// Position of the first key `>= key`.
    pub fn seek(&self, key: &[u8]) -> usize {
        self.records.partition_point(|r| r.key.as_slice() < key)
    }

    pub fn entries(&self, key: &[u8]) -> Option<&[IndexEntry]> {
        self.find(key).map(|r| r.entries.as_slice())
    }

    pub fn block_type(&self, key: &[u8]) -> Option<BlockType> {
        self.find(key).map(|r| r.block_type)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.may_contain(key) && self.find(key).is_some()
    }

    /// Bloom-filter check; `false` means the key is definitely absent.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.bloom.as_ref().is_none_or(|b| b.check(key))
    }

    /// Entry of `key` whose time range covers `timestamp`.
    pub fn entry_at(&self, key: &[u8], timestamp: i64) -> Option<&IndexEntry> {
        let entries = self.entries(key)?;
        let i = entries.partition_point(|e| e.max_time < timestamp);
        entries.get(i).filter(|e| e.contains(timestamp))
    }

    /// Entries of `key` overlapping `[min, max]`.
    pub fn entries_in(&self, key: &[u8], min: i64, max: i64) -> Vec<IndexEntry> {
        self.entries(key)
            .map(|es| es.iter().filter(|e| e.overlaps(min, max)).copied().collect())
            .unwrap_or_default()
    }

    /// Smallest and largest timestamp across all blocks.
    pub fn time_range(&self) -> Option<(i64, i64)> {
        self.time_range
    }
}

/// Check key order and entry invariants, returning the overall time range.
fn validate_records(
    records: &[IndexRecord],
    blocks_end: u64,
) -> Result<Option<(i64, i64)>, SegmentError> {
    let mut time_range: Option<(i64, i64)> = None;
    for (i, record) in records.iter().enumerate() {
        if i > 0 && records[i - 1].key >= record.key {
            return Err(corrupt("index keys are not strictly ascending"));
        }
        if record.entries.is_empty() {
            return Err(corrupt("index record without entries"));
        }
        for (j, entry) in record.entries.iter().enumerate() {
            let end = u64::try_from(entry.offset)
                .ok()
                .filter(|off| *off >= SEGMENT_HDR_SIZE as u64)
                .and_then(|off| off.checked_add(u64::from(entry.size)));
            if end.is_none_or(|end| end > blocks_end) || entry.size < MIN_BLOCK_SIZE {
                return Err(corrupt(format!(
                    "entry at offset {} with size {} lies outside the block region",
                    entry.offset, entry.size
                )));
            }
            if entry.min_time > entry.max_time {
                return Err(corrupt(format!(
                    "entry min time {} after max time {}",
                    entry.min_time, entry.max_time
                )));
            }
            if j > 0 && record.entries[j - 1].max_time >= entry.min_time {
                return Err(corrupt("entries of one key overlap or are out of order"));
            }
            time_range = Some(match time_range {
                None => (entry.min_time, entry.max_time),
                Some((lo, hi)) => (lo.min(entry.min_time), hi.max(entry.max_time)),
            });
        }
    }
    Ok(time_range)
}
