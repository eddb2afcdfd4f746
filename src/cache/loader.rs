use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{Cache, CacheError};
use crate::wal::{self, Wal, WalEntry, WalError};

/// Replays WAL files into a [`Cache`].
#[derive(Debug, Clone)]
pub struct CacheLoader {
    files: Vec<PathBuf>,
}

impl CacheLoader {
    /// Replay `files` in the given order; later files win timestamp ties.
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    /// Every `*.wal` file in `dir`. Files named `_NNNNN.wal` come first in
    /// sequence order, any other WAL files follow by file name. A missing
    /// directory yields an empty list.
    pub fn from_dir(dir: &Path) -> Result<Self, CacheError> {
        let read_dir = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new(Vec::new())),
            Err(e) => return Err(WalError::Io(e).into()),
        };
        let mut files = Vec::new();
        for dirent in read_dir {
            let path = dirent.map_err(WalError::Io)?.path();
            if !path.extension().is_some_and(|ext| ext == wal::WAL_FILE_EXTENSION) || !path.is_file() {
                continue;
            }
            let seq = wal::parse_wal_seq(&path);
            if seq.is_none() {
                debug!(path = %path.display(), "WAL file without a sequence number");
            }
            files.push((seq.map_or((1, 0), |seq| (0, seq)), path));
        }
        files.sort();
        Ok(Self::new(files.into_iter().map(|(_, p)| p).collect()))
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Replay every file into `cache`, stopping at the first error.
    pub fn load(&self, cache: &Cache) -> Result<(), CacheError> {
        for path in &self.files {
            let size = fs::metadata(path).map_err(WalError::Io)?.len();
            if size == 0 {
                debug!(path = %path.display(), "skipping empty WAL file");
                continue;
            }
            info!(path = %path.display(), size, "reading WAL file");

            let log = Wal::<WalEntry>::open_existing(path)?;
            let mut entries = 0usize;
            for entry in log.replay_iter()? {
                cache.apply(entry?)?;
                entries += 1;
            }
            debug!(path = %path.display(), entries, cache_size = cache.size(), "WAL file replayed");
        }
        Ok(())
    }
}
