use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use tracing::{debug, trace};

use super::accessor::{block_bytes, verified_block};
use super::{BlockAccessor, IndexEntry, SegmentError, ShardIndex};
use crate::codec::CodecError;

enum Buffer {
    Loaded(Vec<u8>),
    Released,
    Closed,
}

/// Block accessor holding the whole file in memory.
///
/// [`open`](Self::open) reads a file from disk; `free` drops the buffer
/// and the next read loads it again. [`from_bytes`](Self::from_bytes) wraps
/// an in-memory image with no file behind it; `free` keeps such a buffer.
pub struct BufferedAccessor {
    path: RwLock<PathBuf>,
    buffer: RwLock<Buffer>,
    on_disk: bool,
    index: OnceLock<Arc<ShardIndex>>,
    size: u64,
    accesses: AtomicU64,
}

impl BufferedAccessor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SegmentError> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path)?;
        debug!(path = %path.display(), size = bytes.len(), "segment file buffered");
        Ok(Self::new(path, bytes, true))
    }

    /// Wrap a segment image held in memory. `path` is only reported back.
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
        Self::new(path.into(), bytes, false)
    }

    fn new(path: PathBuf, bytes: Vec<u8>, on_disk: bool) -> Self {
        Self {
            path: RwLock::new(path),
            size: bytes.len() as u64,
            buffer: RwLock::new(Buffer::Loaded(bytes)),
            on_disk,
            index: OnceLock::new(),
            accesses: AtomicU64::new(0),
        }
    }

    fn reload(&self) -> Result<(), SegmentError> {
        let path = self.path();
        let mut guard = self.buffer.write().map_err(|_| SegmentError::poisoned())?;
        if matches!(*guard, Buffer::Released) {
            *guard = Buffer::Loaded(fs::read(&path)?);
            trace!(path = %path.display(), "segment file reloaded");
        }
        Ok(())
    }

    fn with_buffer<R>(
        &self,
        mut f: impl FnMut(&[u8]) -> Result<R, SegmentError>,
    ) -> Result<R, SegmentError> {
        loop {
            {
                let guard = self.buffer.read().map_err(|_| SegmentError::poisoned())?;
                match &*guard {
                    Buffer::Loaded(bytes) => return f(bytes),
                    Buffer::Closed => return Err(SegmentError::Closed),
                    Buffer::Released => {}
                }
            }
            self.reload()?;
        }
    }
}

impl BlockAccessor for BufferedAccessor {
    fn init(&self) -> Result<Arc<ShardIndex>, SegmentError> {
        if let Some(index) = self.index.get() {
            return Ok(Arc::clone(index));
        }
        let parsed = Arc::new(self.with_buffer(ShardIndex::parse)?);
        Ok(Arc::clone(self.index.get_or_init(|| parsed)))
    }

    fn index(&self) -> Result<Arc<ShardIndex>, SegmentError> {
        self.index
            .get()
            .cloned()
            .ok_or_else(|| SegmentError::Internal("segment index not initialized".into()))
    }

    fn with_block(
        &self,
        entry: &IndexEntry,
        f: &mut dyn FnMut(&[u8]) -> Result<(), CodecError>,
    ) -> Result<(), SegmentError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.with_buffer(|data| f(verified_block(data, entry)?).map_err(SegmentError::from))
    }

    fn read_bytes(&self, entry: &IndexEntry, buf: &mut Vec<u8>) -> Result<u32, SegmentError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.with_buffer(|data| {
            let (block, crc) = block_bytes(data, entry)?;
            buf.clear();
            buf.extend_from_slice(block);
            Ok(crc)
        })
    }

    fn rename(&self, path: &Path) -> Result<(), SegmentError> {
        let guard = self.buffer.write().map_err(|_| SegmentError::poisoned())?;
        if matches!(*guard, Buffer::Closed) {
            return Err(SegmentError::Closed);
        }
        let mut current = self.path.write().map_err(|_| SegmentError::poisoned())?;
        if self.on_disk {
            fs::rename(&*current, path)?;
        }
        *current = path.to_path_buf();
        Ok(())
    }

    fn path(&self) -> PathBuf {
        match self.path.read() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn close(&self) -> Result<(), SegmentError> {
        let mut guard = self.buffer.write().map_err(|_| SegmentError::poisoned())?;
        *guard = Buffer::Closed;
        Ok(())
    }

    fn free(&self) -> Result<(), SegmentError> {
        if !self.on_disk {
            return Ok(());
        }
        let mut guard = self.buffer.write().map_err(|_| SegmentError::poisoned())?;
        if matches!(*guard, Buffer::Loaded(_)) {
            *guard = Buffer::Released;
        }
        Ok(())
    }

    fn access_count(&self) -> u64 {
        self.accesses.load(Ordering::SeqCst)
    }
}
