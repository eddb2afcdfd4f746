use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, info};

use super::{SERIES_LOG_FILE, SeriesFileError, SeriesRecord};
use crate::wal::Wal;

struct SeriesFileInner {
    /// `None` once closed.
    log: Option<Wal<SeriesRecord>>,
    ids: HashMap<Vec<u8>, u64>,
    /// `keys[id - 1]` is the key of `id`.
    keys: Vec<Vec<u8>>,
}

/// Durable mapping between series keys and ids.
pub struct SeriesFile {
    path: PathBuf,
    inner: Mutex<SeriesFileInner>,
}

impl SeriesFile {
    /// Open or create the series file in `dir`, replaying its log.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SeriesFileError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let log = Wal::<SeriesRecord>::open(dir.join(SERIES_LOG_FILE))?;
        let mut ids = HashMap::new();
        let mut keys = Vec::new();
        for record in log.replay_iter()? {
            let record = record?;
            let expected = keys.len() as u64 + 1;
            if record.id != expected {
                return Err(SeriesFileError::Corrupt(format!(
                    "expected series id {expected}, found {}",
                    record.id
                )));
            }
            ids.insert(record.key.clone(), record.id);
            keys.push(record.key);
        }

        info!(path = %dir.display(), series = keys.len(), "series file opened");

        Ok(Self {
            path: dir.to_path_buf(),
            inner: Mutex::new(SeriesFileInner {
                log: Some(log),
                ids,
                keys,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, SeriesFileInner>, SeriesFileError> {
        self.inner.lock().map_err(|_| {
            error!("Mutex poisoned in series file");
            SeriesFileError::Internal("Mutex poisoned".into())
        })
    }

    /// Ids of `keys`, in order, creating the missing ones. New series are
    /// persisted with one append and one fsync.
    pub fn create_series_list_if_not_exists<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
    ) -> Result<Vec<u64>, SeriesFileError> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let log = inner.log.as_ref().ok_or(SeriesFileError::Closed)?;

        let mut next_id = inner.keys.len() as u64 + 1;
        let mut created: HashMap<&[u8], u64> = HashMap::new();
        let mut records = Vec::new();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let key = key.as_ref();
            if let Some(&id) = inner.ids.get(key).or_else(|| created.get(key)) {
                out.push(id);
                continue;
            }
            created.insert(key, next_id);
            records.push(SeriesRecord {
                id: next_id,
                key: key.to_vec(),
            });
            out.push(next_id);
            next_id += 1;
        }

        if !records.is_empty() {
            log.append_batch(&records)?;
            debug!(created = records.len(), total = next_id - 1, "series created");
            for record in records {
                inner.ids.insert(record.key.clone(), record.id);
                inner.keys.push(record.key);
            }
        }
        Ok(out)
    }

    pub fn series_id(&self, key: &[u8]) -> Result<Option<u64>, SeriesFileError> {
        Ok(self.lock()?.ids.get(key).copied())
    }

    pub fn series_key(&self, id: u64) -> Result<Option<Vec<u8>>, SeriesFileError> {
        let guard = self.lock()?;
        let Some(index) = id.checked_sub(1) else {
            return Ok(None);
        };
        Ok(guard.keys.get(index as usize).cloned())
    }

    pub fn series_count(&self) -> Result<u64, SeriesFileError> {
        Ok(self.lock()?.keys.len() as u64)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync and release the log. Lookups keep working; creating series
    /// fails with [`SeriesFileError::Closed`]. Closing twice is harmless.
    pub fn close(&self) -> Result<(), SeriesFileError> {
        let mut guard = self.lock()?;
        if let Some(log) = guard.log.take() {
            log.sync()?;
            info!(path = %self.path.display(), series = guard.keys.len(), "series file closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for SeriesFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesFile")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
