use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};

use super::snapshot::{fsync_dir, read_snapshot, write_snapshot};
use super::{
    IndexError, IndexFileKind, IndexOptions, SeriesIndex, log_file_name, parse_index_file,
    snapshot_file_name,
};
use crate::series::{self, SeriesFile, SeriesRecord, Tags};
use crate::wal::{self, Wal, WalOptions};

/// Series and tag values of one measurement.
#[derive(Debug, Default)]
struct Measurement {
    series: BTreeSet<Vec<u8>>,
    tags: BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>>,
}

/// State of an open index.
struct IndexState {
    series: BTreeMap<Vec<u8>, u64>,
    measurements: BTreeMap<Vec<u8>, Measurement>,
    /// Active log, created on the first flush after open or roll.
    log: Option<Wal<SeriesRecord>>,
    next_seq: u64,
    pending: Vec<SeriesRecord>,
    pending_bytes: usize,
    /// On-disk logs and snapshot the next compaction replaces.
    files: Vec<PathBuf>,
    /// Series were logged since the last snapshot.
    dirty: bool,
}

impl IndexState {
    fn insert(&mut self, key: &[u8], id: u64, name: &[u8], tags: &Tags) -> bool {
        if self.series.contains_key(key) {
            return false;
        }
        self.series.insert(key.to_vec(), id);
        let measurement = self.measurements.entry(name.to_vec()).or_default();
        measurement.series.insert(key.to_vec());
        for tag in tags {
            measurement
                .tags
                .entry(tag.key.clone())
                .or_default()
                .insert(tag.value.clone());
        }
        true
    }

    /// Insert a replayed record, deriving name and tags from its key.
    fn insert_record(&mut self, record: SeriesRecord) {
        let (name, tags) = series::parse_key(&record.key);
        self.insert(&record.key, record.id, &name, &tags);
    }
}

/// File-backed series index: append-only logs plus compacted snapshots.
///
/// See the [module-level documentation](super) for the layout.
pub struct DiskIndex {
    path: PathBuf,
    series_file: Arc<SeriesFile>,
    options: IndexOptions,
    /// `None` before `open` and after `close`.
    state: Option<IndexState>,
    compaction: Option<JoinHandle<Result<(), IndexError>>>,
    compaction_error: Option<IndexError>,
}

impl DiskIndex {
    /// An index at `path`; nothing touches the disk before
    /// [`open`](SeriesIndex::open).
    pub fn new(series_file: Arc<SeriesFile>, path: impl Into<PathBuf>, options: IndexOptions) -> Self {
        Self {
            path: path.into(),
            series_file,
            options,
            state: None,
            compaction: None,
            compaction_error: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    fn state(&self) -> Result<&IndexState, IndexError> {
        self.state.as_ref().ok_or(IndexError::Closed)
    }

    fn sync(&self) -> bool {
        !self.options.disable_fsync
    }

    // --------------------------------------------------------------------------------------------
    // Lookups
    // --------------------------------------------------------------------------------------------

    pub fn series_count(&self) -> Result<usize, IndexError> {
        Ok(self.state()?.series.len())
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool, IndexError> {
        Ok(self.state()?.series.contains_key(key))
    }

    pub fn series_id(&self, key: &[u8]) -> Result<Option<u64>, IndexError> {
        Ok(self.state()?.series.get(key).copied())
    }

    /// Every measurement name, sorted.
    pub fn measurement_names(&self) -> Result<Vec<Vec<u8>>, IndexError> {
        Ok(self.state()?.measurements.keys().cloned().collect())
    }

    /// Series keys of a measurement, sorted.
    pub fn series_keys(&self, name: &[u8]) -> Result<Vec<Vec<u8>>, IndexError> {
        Ok(self
            .state()?
            .measurements
            .get(name)
            .map(|m| m.series.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Distinct values of tag `tag_key` within a measurement, sorted.
    pub fn tag_values(&self, name: &[u8], tag_key: &[u8]) -> Result<Vec<Vec<u8>>, IndexError> {
        Ok(self
            .state()?
            .measurements
            .get(name)
            .and_then(|m| m.tags.get(tag_key))
            .map(|values| values.iter().cloned().collect())
            .unwrap_or_default())
    }

    // --------------------------------------------------------------------------------------------
    // Log handling
    // --------------------------------------------------------------------------------------------

    /// Append pending series to the active log, rolling it when it grows
    /// past `max_log_file_size`.
    fn flush_log(&mut self) -> Result<(), IndexError> {
        let sync = self.sync();
        let max_log_file_size = self.options.max_log_file_size;
        let dir = self.path.clone();
        let state = self.state.as_mut().ok_or(IndexError::Closed)?;
        if state.pending.is_empty() {
            return Ok(());
        }

        if state.log.is_none() {
            let seq = state.next_seq;
            state.next_seq += 1;
            let log_path = dir.join(log_file_name(seq));
            let log = Wal::open_with(
                &log_path,
                WalOptions {
                    sync,
                    ..WalOptions::default()
                },
            )?;
            debug!(path = %log_path.display(), "index log created");
            state.files.push(log_path);
            state.log = Some(log);
        }

        let Some(log) = state.log.as_ref() else {
            return Err(IndexError::Internal("index log missing after open".into()));
        };
        log.append_batch(&state.pending)?;
        trace!(series = state.pending.len(), bytes = state.pending_bytes, "index log flushed");
        state.pending.clear();
        state.pending_bytes = 0;
        state.dirty = true;

        let size = log.file_size()?;
        if size > max_log_file_size {
            debug!(path = %log.path().display(), size, "index log rolled");
            state.log = None;
        }
        Ok(())
    }

    fn join_compaction(&mut self) {
        let Some(handle) = self.compaction.take() else {
            return;
        };
        let result = match handle.join() {
            Ok(result) => result,
            Err(_) => Err(IndexError::Internal("compaction thread panicked".into())),
        };
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "index compaction failed");
            if self.compaction_error.is_none() {
                self.compaction_error = Some(e);
            }
        }
    }
}

/// Remove `path`, ignoring files that are already gone.
fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl SeriesIndex for DiskIndex {
    fn open(&mut self) -> Result<(), IndexError> {
        if self.state.is_some() {
            return Ok(());
        }
        fs::create_dir_all(&self.path)?;

        let mut logs = Vec::new();
        let mut snapshots = Vec::new();
        for dirent in fs::read_dir(&self.path)? {
            let path = dirent?.path();
            match parse_index_file(&path) {
                Some((IndexFileKind::Log, seq)) => logs.push((seq, path)),
                Some((IndexFileKind::Snapshot, seq)) => snapshots.push((seq, path)),
                None if path.extension().is_some_and(|ext| ext == "tmp") => {
                    debug!(path = %path.display(), "removing partial index file");
                    remove_file_if_exists(&path)?;
                }
                None => {}
            }
        }
        logs.sort();
        snapshots.sort();

        let mut state = IndexState {
            series: BTreeMap::new(),
            measurements: BTreeMap::new(),
            log: None,
            next_seq: 1,
            pending: Vec::new(),
            pending_bytes: 0,
            files: Vec::new(),
            dirty: false,
        };

        let base_seq = match snapshots.pop() {
            Some((seq, path)) => {
                for record in read_snapshot(&path)? {
                    state.insert_record(record);
                }
                state.files.push(path);
                seq
            }
            None => 0,
        };
        for (_, path) in snapshots {
            debug!(path = %path.display(), "removing superseded snapshot");
            remove_file_if_exists(&path)?;
        }

        for (seq, path) in logs {
            if seq < base_seq {
                debug!(path = %path.display(), "removing superseded log");
                remove_file_if_exists(&path)?;
                continue;
            }
            for record in wal::read_all::<SeriesRecord>(&path)? {
                state.insert_record(record);
            }
            state.dirty = true;
            state.files.push(path);
        }
        state.next_seq = state
            .files
            .iter()
            .filter_map(|p| parse_index_file(p).map(|(_, seq)| seq))
            .max()
            .unwrap_or(0)
            + 1;

        info!(
            path = %self.path.display(),
            series = state.series.len(),
            files = state.files.len(),
            "index opened"
        );
        self.state = Some(state);
        Ok(())
    }

    fn create_series_list_if_not_exists(
        &mut self,
        keys: &[Vec<u8>],
        names: &[Vec<u8>],
        tags: &[Tags],
    ) -> Result<(), IndexError> {
        if keys.len() != names.len() || keys.len() != tags.len() {
            return Err(IndexError::InvalidInput(format!(
                "parallel slices differ in length: keys={} names={} tags={}",
                keys.len(),
                names.len(),
                tags.len()
            )));
        }
        if self.state.is_none() {
            return Err(IndexError::Closed);
        }
        if keys.is_empty() {
            return Ok(());
        }

        let ids = self.series_file.create_series_list_if_not_exists(keys)?;

        let buffer_limit = self.options.log_buffer_size;
        let state = self.state.as_mut().ok_or(IndexError::Closed)?;
        let mut created = 0usize;
        for (i, (key, id)) in keys.iter().zip(ids).enumerate() {
            if !state.insert(key, id, &names[i], &tags[i]) {
                continue;
            }
            state.pending_bytes += 12 + key.len();
            state.pending.push(SeriesRecord {
                id,
                key: key.clone(),
            });
            created += 1;
        }
        let flush = state.pending_bytes >= buffer_limit;
        trace!(batch = keys.len(), created, "series inserted");

        if flush {
            self.flush_log()?;
        }
        Ok(())
    }

    fn compact(&mut self) -> Result<(), IndexError> {
        self.join_compaction();
        self.flush_log()?;

        let sync = self.sync();
        let dir = self.path.clone();
        let state = self.state.as_mut().ok_or(IndexError::Closed)?;
        state.log = None;
        if !state.dirty {
            debug!(path = %dir.display(), "index unchanged since last snapshot, nothing to compact");
            return Ok(());
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let snapshot_path = dir.join(snapshot_file_name(seq));
        let mut records: Vec<SeriesRecord> = state
            .series
            .iter()
            .map(|(key, &id)| SeriesRecord {
                id,
                key: key.clone(),
            })
            .collect();
        records.sort_by_key(|r| r.id);
        let superseded = mem::replace(&mut state.files, vec![snapshot_path.clone()]);
        state.dirty = false;

        info!(path = %snapshot_path.display(), series = records.len(), "index compaction started");
        let handle = thread::Builder::new()
            .name("tsmstore-index-compact".into())
            .spawn(move || -> Result<(), IndexError> {
                write_snapshot(&snapshot_path, &records, sync)?;
                for path in &superseded {
                    remove_file_if_exists(path)?;
                }
                info!(
                    path = %snapshot_path.display(),
                    removed = superseded.len(),
                    "index compaction complete"
                );
                Ok(())
            })?;
        self.compaction = Some(handle);
        Ok(())
    }

    fn wait(&mut self) {
        self.join_compaction();
    }

    fn close(&mut self) -> Result<(), IndexError> {
        self.join_compaction();
        if self.state.is_some() {
            self.flush_log()?;
            let series = self.state.take().map(|s| s.series.len()).unwrap_or(0);
            if self.sync() {
                fsync_dir(&self.path)?;
            }
            info!(path = %self.path.display(), series, "index closed");
        }
        match self.compaction_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for DiskIndex {
    fn drop(&mut self) {
        if let Some(handle) = self.compaction.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for DiskIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskIndex")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("open", &self.state.is_some())
            .finish()
    }
}
