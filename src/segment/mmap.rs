use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use memmap2::Mmap;
use tracing::{debug, trace};

use super::accessor::{block_bytes, verified_block};
use super::{
    BlockAccessor, IndexEntry, SEGMENT_FOOTER_SIZE, SEGMENT_HDR_SIZE, SegmentError, ShardIndex,
};
use crate::codec::CodecError;

enum Mapping {
    Mapped { file: File, mmap: Mmap },
    /// Unmapped by `free`; the next read maps the file again.
    Released { file: File },
    Closed,
}

/// Block accessor over a read-only memory map of the segment file.
///
/// Reads share the mapping under a read lock. `free`, `close`, `rename`
/// and the remap that follows a `free` take the write lock, so a reader
/// never sees a half-unmapped region.
pub struct MmapAccessor {
    path: RwLock<PathBuf>,
    mapping: RwLock<Mapping>,
    index: OnceLock<Arc<ShardIndex>>,
    size: u64,
    accesses: AtomicU64,
}

fn map_file(file: &File) -> Result<Mmap, SegmentError> {
    // SAFETY: segment files are immutable once renamed into place and the
    // map is read-only; every slice taken from it is bounds-checked.
    let mmap = unsafe { Mmap::map(file)? };
    Ok(mmap)
}

impl MmapAccessor {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SegmentError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        if len < (SEGMENT_HDR_SIZE + SEGMENT_FOOTER_SIZE) as u64 {
            return Err(SegmentError::CorruptIndex(format!("file too small: {len} bytes")));
        }
        let mmap = map_file(&file)?;
        let size = mmap.len() as u64;
        debug!(path = %path.display(), size, "segment file mapped");
        Ok(Self {
            path: RwLock::new(path),
            mapping: RwLock::new(Mapping::Mapped { file, mmap }),
            index: OnceLock::new(),
            size,
            accesses: AtomicU64::new(0),
        })
    }

    /// Whether the file is currently mapped.
    pub fn is_mapped(&self) -> bool {
        matches!(
            self.mapping.read().as_deref(),
            Ok(Mapping::Mapped { .. })
        )
    }

    /// Map the file again after `free`.
    fn remap(&self) -> Result<(), SegmentError> {
        let mut guard = self.mapping.write().map_err(|_| SegmentError::poisoned())?;
        let next = match std::mem::replace(&mut *guard, Mapping::Closed) {
            Mapping::Released { file } => match map_file(&file) {
                Ok(mmap) => {
                    trace!("segment file remapped");
                    Mapping::Mapped { file, mmap }
                }
                Err(e) => {
                    *guard = Mapping::Released { file };
                    return Err(e);
                }
            },
            other => other,
        };
        *guard = next;
        Ok(())
    }

    /// Run `f` over the mapped bytes, remapping first if they were freed.
    fn with_mapped<R>(
        &self,
        mut f: impl FnMut(&[u8]) -> Result<R, SegmentError>,
    ) -> Result<R, SegmentError> {
        loop {
            {
                let guard = self.mapping.read().map_err(|_| SegmentError::poisoned())?;
                match &*guard {
                    Mapping::Mapped { mmap, .. } => return f(&mmap[..]),
                    Mapping::Closed => return Err(SegmentError::Closed),
                    Mapping::Released { .. } => {}
                }
            }
            self.remap()?;
        }
    }
}

impl BlockAccessor for MmapAccessor {
    fn init(&self) -> Result<Arc<ShardIndex>, SegmentError> {
        if let Some(index) = self.index.get() {
            return Ok(Arc::clone(index));
        }
        let parsed = Arc::new(self.with_mapped(ShardIndex::parse)?);
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
        self.with_mapped(|data| {
            let block = verified_block(data, entry)?;
            f(block).map_err(SegmentError::from)
        })
    }

    fn read_bytes(&self, entry: &IndexEntry, buf: &mut Vec<u8>) -> Result<u32, SegmentError> {
        self.accesses.fetch_add(1, Ordering::SeqCst);
        self.with_mapped(|data| {
            let (block, crc) = block_bytes(data, entry)?;
            buf.clear();
            buf.extend_from_slice(block);
            Ok(crc)
        })
    }

    fn rename(&self, path: &Path) -> Result<(), SegmentError> {
        let guard = self.mapping.write().map_err(|_| SegmentError::poisoned())?;
        if matches!(*guard, Mapping::Closed) {
            return Err(SegmentError::Closed);
        }
        let mut current = self.path.write().map_err(|_| SegmentError::poisoned())?;
        // The open descriptor and mapping follow the inode across the rename.
        fs::rename(&*current, path)?;
        debug!(from = %current.display(), to = %path.display(), "segment file renamed");
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
        let mut guard = self.mapping.write().map_err(|_| SegmentError::poisoned())?;
        if !matches!(*guard, Mapping::Closed) {
            *guard = Mapping::Closed;
            debug!(path = %self.path().display(), "segment file closed");
        }
        Ok(())
    }

    fn free(&self) -> Result<(), SegmentError> {
        let mut guard = self.mapping.write().map_err(|_| SegmentError::poisoned())?;
        let next = match std::mem::replace(&mut *guard, Mapping::Closed) {
            Mapping::Mapped { file, mmap } => {
                drop(mmap);
                trace!("segment file unmapped");
                Mapping::Released { file }
            }
            other => other,
        };
        *guard = next;
        Ok(())
    }

    fn access_count(&self) -> u64 {
        self.accesses.load(Ordering::SeqCst)
    }
}
