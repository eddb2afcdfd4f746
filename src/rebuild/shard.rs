use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{INDEX_DIRECTORY, RebuildError, SeriesBatch, TMP_INDEX_DIRECTORY};
use crate::cache::{Cache, CacheLoader};
use crate::index::{DiskIndex, IndexOptions, SeriesIndex};
use crate::segment::{SEGMENT_FILE_EXTENSION, SegmentReader};
use crate::series::SeriesFile;

/// Bytes per series entry in an index log, used to size the log buffer so
/// that one batch is roughly one log write.
const LOG_ENTRY_SIZE_HINT: usize = 12;

/// Rebuild the series index of one shard.
///
/// Skips the shard when `<data_dir>/index` exists. Otherwise the index is
/// built at `<data_dir>/.index` from the shard's segment files and its WAL
/// files, compacted, closed, and renamed to `<data_dir>/index`.
pub fn index_shard(
    series_file: &Arc<SeriesFile>,
    data_dir: &Path,
    wal_dir: &Path,
    max_log_file_size: u64,
    max_cache_size: u64,
    batch_size: usize,
    verbose: bool,
) -> Result<(), RebuildError> {
    info!("rebuilding shard");

    let index_path = data_dir.join(INDEX_DIRECTORY);
    info!(path = %index_path.display(), "checking index path");
    match fs::metadata(&index_path) {
        Ok(_) => {
            info!(path = %index_path.display(), "index already exists, skipping");
            return Ok(());
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let tmp_path = data_dir.join(TMP_INDEX_DIRECTORY);
    info!(path = %tmp_path.display(), "cleaning up partial index from previous run, if any");
    match fs::remove_dir_all(&tmp_path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
        _ => {}
    }

    let options = IndexOptions {
        max_log_file_size,
        log_buffer_size: LOG_ENTRY_SIZE_HINT * batch_size,
        disable_fsync: true,
    };
    let mut index = DiskIndex::new(Arc::clone(series_file), &tmp_path, options);
    info!(path = %tmp_path.display(), "opening index in temporary location");
    build_index(&mut index, data_dir, wal_dir, max_cache_size, batch_size, verbose)?;

    info!(from = %tmp_path.display(), to = %index_path.display(), "moving index to permanent location");
    fs::rename(&tmp_path, &index_path)?;
    fs::File::open(data_dir)?.sync_all()?;
    Ok(())
}

/// Open `index`, insert every series of the shard's segment files and then
/// of its WAL files, compact and close it.
///
/// The index is closed on every path once opened; a failure before closing
/// is returned in preference to a close error.
pub fn build_index<I: SeriesIndex + ?Sized>(
    index: &mut I,
    data_dir: &Path,
    wal_dir: &Path,
    max_cache_size: u64,
    batch_size: usize,
    verbose: bool,
) -> Result<(), RebuildError> {
    index.open()?;

    if let Err(e) = populate_index(index, data_dir, wal_dir, max_cache_size, batch_size, verbose) {
        if let Err(close_err) = index.close() {
            warn!(error = %close_err, "failed to close index after error");
        }
        return Err(e);
    }

    info!("closing index");
    index.close()?;
    Ok(())
}

fn populate_index<I: SeriesIndex + ?Sized>(
    index: &mut I,
    data_dir: &Path,
    wal_dir: &Path,
    max_cache_size: u64,
    batch_size: usize,
    verbose: bool,
) -> Result<(), RebuildError> {
    let segment_paths = collect_segment_files(data_dir)?;
    info!(files = segment_paths.len(), "iterating over segment files");
    for path in &segment_paths {
        info!(path = %path.display(), "processing segment file");
        index_segment_file(index, path, batch_size, verbose)?;
    }

    match collect_wal_files(wal_dir)? {
        Some(wal_paths) => {
            info!(files = wal_paths.len(), "building cache from WAL files");
            let cache = Cache::new(max_cache_size);
            CacheLoader::new(wal_paths).load(&cache)?;
            info!(keys = cache.len(), size = cache.size(), "iterating over cache");
            index_cache_keys(index, &cache, batch_size, verbose)?;
        }
        None => debug!(path = %wal_dir.display(), "no WAL directory"),
    }

    info!("compacting index");
    index.compact()?;
    index.wait();
    Ok(())
}

/// Insert the series of every key of one segment file, in key order.
///
/// A file that cannot be opened is logged and skipped.
pub fn index_segment_file<I: SeriesIndex + ?Sized>(
    index: &mut I,
    path: &Path,
    batch_size: usize,
    verbose: bool,
) -> Result<(), RebuildError> {
    let reader = match SegmentReader::open(path) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unable to read segment file, skipping");
            return Ok(());
        }
    };

    let mut batch = SeriesBatch::new(batch_size, verbose);
    for key in reader.keys() {
        batch.add(index, key)?;
    }
    batch.flush(index)?;
    debug!(path = %path.display(), keys = reader.key_count(), inserts = batch.flushes(), "segment file indexed");

    if let Err(e) = reader.close() {
        warn!(path = %path.display(), error = %e, "failed to close segment file");
    }
    Ok(())
}

/// Insert the series of every key in `cache`.
pub fn index_cache_keys<I: SeriesIndex + ?Sized>(
    index: &mut I,
    cache: &Cache,
    batch_size: usize,
    verbose: bool,
) -> Result<(), RebuildError> {
    let mut batch = SeriesBatch::new(batch_size, verbose);
    for key in cache.keys()? {
        batch.add(index, &key)?;
    }
    batch.flush(index)?;
    Ok(())
}

/// Segment files directly under `dir`, sorted by name.
pub fn collect_segment_files(dir: &Path) -> Result<Vec<PathBuf>, RebuildError> {
    let mut paths = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let path = dirent?.path();
        if path.extension().is_some_and(|ext| ext == SEGMENT_FILE_EXTENSION) && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// WAL files of `dir` in sequence order, or `None` when `dir` is missing.
pub fn collect_wal_files(dir: &Path) -> Result<Option<Vec<PathBuf>>, RebuildError> {
    match fs::metadata(dir) {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    Ok(Some(CacheLoader::from_dir(dir)?.files().to_vec()))
}
