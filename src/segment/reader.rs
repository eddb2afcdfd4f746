use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use tracing::{debug, info};

use crate::codec::{
    BlockType, BooleanArray, BooleanValue, FloatArray, FloatValue, IntegerArray, IntegerValue,
    StringArray, StringValue, UnsignedArray, UnsignedValue, Value,
};

use super::{
    BlockAccessor, BufferedAccessor, IndexEntry, MmapAccessor, SegmentError, ShardIndex,
};

/// Read handle for one segment file.
///
/// Every read holds a shared lock on the accessor for its whole duration;
/// `rename`, `free` and `close` take it exclusively, so they wait for
/// in-flight reads and never tear bytes out from under them. The index is
/// parsed once on open and shared.
pub struct SegmentReader {
    accessor: RwLock<Box<dyn BlockAccessor>>,
    index: Arc<ShardIndex>,
}

impl std::fmt::Debug for SegmentReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentReader")
            .field("path", &self.path())
            .field("index", &self.index)
            .finish()
    }
}

impl SegmentReader {
    /// Open `path` through a memory map.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SegmentError> {
        Self::with_accessor(Box::new(MmapAccessor::open(path)?))
    }

    /// Open `path` by reading it into memory.
    pub fn open_buffered(path: impl AsRef<Path>) -> Result<Self, SegmentError> {
        Self::with_accessor(Box::new(BufferedAccessor::open(path)?))
    }

    /// Wrap any accessor, parsing its index.
    pub fn with_accessor(accessor: Box<dyn BlockAccessor>) -> Result<Self, SegmentError> {
        let index = accessor.init()?;
        debug!(
            path = %accessor.path().display(),
            keys = index.key_count(),
            "segment reader opened"
        );
        Ok(Self {
            accessor: RwLock::new(accessor),
            index,
        })
    }

    fn accessor(&self) -> Result<RwLockReadGuard<'_, Box<dyn BlockAccessor>>, SegmentError> {
        self.accessor.read().map_err(|_| SegmentError::poisoned())
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    /// Values of the block of `key` covering `timestamp`; empty if none does.
    pub fn read(&self, key: &[u8], timestamp: i64) -> Result<Vec<Value>, SegmentError> {
        self.accessor()?.read(key, timestamp)
    }

    /// All values of `key` across its blocks.
    pub fn read_all(&self, key: &[u8]) -> Result<Vec<Value>, SegmentError> {
        self.accessor()?.read_all(key)
    }

    pub fn read_block_at(
        &self,
        entry: &IndexEntry,
        out: &mut Vec<Value>,
    ) -> Result<(), SegmentError> {
        self.accessor()?.read_block(entry, out)
    }

    pub fn read_float_block_at(
        &self,
        entry: &IndexEntry,
        out: &mut Vec<FloatValue>,
    ) -> Result<(), SegmentError> {
        self.accessor()?.read_float_block(entry, out)
    }

    pub fn read_integer_block_at(
        &self,
        entry: &IndexEntry,
        out: &mut Vec<IntegerValue>,
    ) -> Result<(), SegmentError> {
        self.accessor()?.read_integer_block(entry, out)
    }

    pub fn read_unsigned_block_at(
        &self,
        entry: &IndexEntry,
        out: &mut Vec<UnsignedValue>,
    ) -> Result<(), SegmentError> {
        self.accessor()?.read_unsigned_block(entry, out)
    }

    pub fn read_string_block_at(
        &self,
        entry: &IndexEntry,
        out: &mut Vec<StringValue>,
    ) -> Result<(), SegmentError> {
        self.accessor()?.read_string_block(entry, out)
    }

    pub fn read_boolean_block_at(
        &self,
        entry: &IndexEntry,
        out: &mut Vec<BooleanValue>,
    ) -> Result<(), SegmentError> {
        self.accessor()?.read_boolean_block(entry, out)
    }

    pub fn read_float_array_block_at(
        &self,
        entry: &IndexEntry,
        out: &mut FloatArray,
    ) -> Result<(), SegmentError> {
        self.accessor()?.read_float_array_block(entry, out)
    }

    pub fn read_integer_array_block_at(
        &self,
        entry: &IndexEntry,
        out: &mut IntegerArray,
    ) -> Result<(), SegmentError> {
        self.accessor()?.read_integer_array_block(entry, out)
    }

    pub fn read_unsigned_array_block_at(
        &self,
        entry: &IndexEntry,
        out: &mut UnsignedArray,
    ) -> Result<(), SegmentError> {
        self.accessor()?.read_unsigned_array_block(entry, out)
    }

    pub fn read_string_array_block_at(
        &self,
        entry: &IndexEntry,
        out: &mut StringArray,
    ) -> Result<(), SegmentError> {
        self.accessor()?.read_string_array_block(entry, out)
    }

    pub fn read_boolean_array_block_at(
        &self,
        entry: &IndexEntry,
        out: &mut BooleanArray,
    ) -> Result<(), SegmentError> {
        self.accessor()?.read_boolean_array_block(entry, out)
    }

    /// Raw bytes of the block at `entry` and its stored checksum.
    pub fn read_bytes(&self, entry: &IndexEntry, buf: &mut Vec<u8>) -> Result<u32, SegmentError> {
        self.accessor()?.read_bytes(entry, buf)
    }

    // --------------------------------------------------------------------------------------------
    // Index
    // --------------------------------------------------------------------------------------------

    pub fn index(&self) -> &Arc<ShardIndex> {
        &self.index
    }

    pub fn key_count(&self) -> usize {
        self.index.key_count()
    }

    pub fn key_at(&self, i: usize) -> Option<(&[u8], BlockType)> {
        self.index.key_at(i)
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.index.keys()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.contains(key)
    }

    pub fn may_contain(&self, key: &[u8]) -> bool {
        self.index.may_contain(key)
    }

    pub fn entries(&self, key: &[u8]) -> &[IndexEntry] {
        self.index.entries(key).unwrap_or_default()
    }

    pub fn block_type(&self, key: &[u8]) -> Option<BlockType> {
        self.index.block_type(key)
    }

    pub fn time_range(&self) -> Option<(i64, i64)> {
        self.index.time_range()
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    pub fn path(&self) -> PathBuf {
        match self.accessor.read() {
            Ok(a) => a.path(),
            Err(poisoned) => poisoned.into_inner().path(),
        }
    }

    pub fn size(&self) -> Result<u64, SegmentError> {
        Ok(self.accessor()?.size())
    }

    pub fn access_count(&self) -> Result<u64, SegmentError> {
        Ok(self.accessor()?.access_count())
    }

    pub fn rename(&self, path: impl AsRef<Path>) -> Result<(), SegmentError> {
        let accessor = self.accessor.write().map_err(|_| SegmentError::poisoned())?;
        accessor.rename(path.as_ref())
    }

    /// Release the file's bytes until the next read.
    pub fn free(&self) -> Result<(), SegmentError> {
        let accessor = self.accessor.write().map_err(|_| SegmentError::poisoned())?;
        accessor.free()
    }

    /// Release the file for good. Later reads fail with
    /// [`SegmentError::Closed`]; closing twice is fine.
    pub fn close(&self) -> Result<(), SegmentError> {
        let accessor = self.accessor.write().map_err(|_| SegmentError::poisoned())?;
        accessor.close()?;
        info!(path = %accessor.path().display(), "segment reader closed");
        Ok(())
    }
}
