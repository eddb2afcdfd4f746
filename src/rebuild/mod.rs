//! # Index Rebuild
//!
//! Offline reconstruction of shard series indexes from segment files and
//! WAL files.
//!
//! ## Directory layout
//!
//! ```text
//! <data_dir>/<db>/_series/                 series file, one per database
//! <data_dir>/<db>/<rp>/<shard_id>/*.tsm    segment files
//! <data_dir>/<db>/<rp>/<shard_id>/index    published index
//! <data_dir>/<db>/<rp>/<shard_id>/.index   index under construction
//! <wal_dir>/<db>/<rp>/<shard_id>/*.wal     WAL files
//! ```
//!
//! ## Pipeline
//!
//! [`run`] walks databases and retention policies. Shards of one retention
//! policy are handed to `concurrency` worker threads, which claim them one at
//! a time from a shared atomic cursor and report through a bounded channel.
//! The first error is returned once every worker is done; a failing shard
//! does not stop its siblings.
//!
//! Per shard, [`index_shard`] skips shards that already have an `index`,
//! clears any stale `.index`, inserts series from segment files (in key
//! order) and then from the replayed WAL cache, compacts, closes, and renames
//! `.index` to `index`. A partially built index is never visible under
//! `index`.

mod batch;
mod shard;

#[cfg(test)]
mod tests;

pub use batch::SeriesBatch;
pub use shard::{
    build_index, collect_segment_files, collect_wal_files, index_cache_keys, index_segment_file,
    index_shard,
};

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use thiserror::Error;
use tracing::{error, info, info_span};

use crate::RebuildConfig;
use crate::cache::CacheError;
use crate::index::IndexError;
use crate::series::{SERIES_FILE_DIRECTORY, SeriesFile, SeriesFileError};

/// Default number of series per insert call.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Published index directory inside a shard.
pub const INDEX_DIRECTORY: &str = "index";

/// Staging index directory inside a shard.
pub const TMP_INDEX_DIRECTORY: &str = ".index";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("series file error: {0}")]
    SeriesFile(#[from] SeriesFileError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// An insert batch was rejected by the index.
    #[error("problem creating series: {0}")]
    CreateSeries(#[source] IndexError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The operator declined to run as root.
    #[error("operation aborted")]
    Aborted,

    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Root check
// ------------------------------------------------------------------------------------------------

/// Whether the process runs with root's effective user id.
#[cfg(unix)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_root() -> bool {
    false
}

const ROOT_WARNING: &str = "\
You are currently running as root. This will build your
index files with root ownership and will be inaccessible
if you run the database as a non-root user. You should run
the rebuild as the same user you are running the database.
Are you sure you want to continue? (y/N): ";

/// Ask on stdin/stdout whether to continue as root.
pub fn prompt_root_confirmation() -> bool {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    confirm_with(&mut stdin.lock(), &mut stdout)
}

/// Print the root warning to `output` and read a `(y/N)` answer from
/// `input`. Anything but an answer starting with `y` declines.
pub fn confirm_with(input: &mut impl BufRead, output: &mut impl Write) -> bool {
    if output
        .write_all(ROOT_WARNING.as_bytes())
        .and_then(|_| output.flush())
        .is_err()
    {
        return false;
    }
    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim().to_lowercase().starts_with('y')
}

// ------------------------------------------------------------------------------------------------
// Traversal
// ------------------------------------------------------------------------------------------------

/// Names of the directories directly under `dir`, sorted.
fn list_dirs(dir: &Path) -> Result<Vec<String>, RebuildError> {
    let mut names = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let dirent = dirent?;
        if !dirent.file_type()?.is_dir() {
            continue;
        }
        names.push(dirent.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

fn matches_filter(filter: &Option<String>, name: &str) -> bool {
    filter.as_deref().is_none_or(|f| f.is_empty() || f == name)
}

/// Rebuild the index of every shard under `config.data_dir`.
///
/// When running as root, `confirm` decides whether to go on; declining
/// returns [`RebuildError::Aborted`] before anything is touched.
pub fn run(config: &RebuildConfig, confirm: impl FnOnce() -> bool) -> Result<(), RebuildError> {
    config.validate()?;

    if is_root() && !confirm() {
        return Err(RebuildError::Aborted);
    }

    for name in list_dirs(&config.data_dir)? {
        if !matches_filter(&config.database_filter, &name) {
            continue;
        }
        process_database(
            config,
            &name,
            &config.data_dir.join(&name),
            &config.wal_dir.join(&name),
        )?;
    }
    Ok(())
}

/// Rebuild every retention policy of one database.
pub fn process_database(
    config: &RebuildConfig,
    db: &str,
    data_dir: &Path,
    wal_dir: &Path,
) -> Result<(), RebuildError> {
    info!(db, "rebuilding database");

    let series_file = Arc::new(SeriesFile::open(data_dir.join(SERIES_FILE_DIRECTORY))?);

    let mut result = Ok(());
    match list_dirs(data_dir) {
        Ok(names) => {
            for rp in names {
                if rp == SERIES_FILE_DIRECTORY || !matches_filter(&config.retention_filter, &rp) {
                    continue;
                }
                result = process_retention_policy(
                    config,
                    &series_file,
                    db,
                    &rp,
                    &data_dir.join(&rp),
                    &wal_dir.join(&rp),
                );
                if result.is_err() {
                    break;
                }
            }
        }
        Err(e) => result = Err(e),
    }

    let closed = series_file.close();
    result?;
    closed?;
    Ok(())
}

/// Rebuild every shard of one retention policy on a pool of
/// `config.concurrency` worker threads.
pub fn process_retention_policy(
    config: &RebuildConfig,
    series_file: &Arc<SeriesFile>,
    db: &str,
    rp: &str,
    data_dir: &Path,
    wal_dir: &Path,
) -> Result<(), RebuildError> {
    info!(db, rp, "rebuilding retention policy");

    let mut shards = Vec::new();
    for name in list_dirs(data_dir)? {
        if !matches_filter(&config.shard_filter, &name) {
            continue;
        }
        if let Ok(id) = name.parse::<u64>() {
            shards.push((id, name));
        }
    }
    if shards.is_empty() {
        return Ok(());
    }

    let (tx, rx) = crossbeam::channel::bounded::<Result<(), RebuildError>>(shards.len());
    let cursor = AtomicUsize::new(0);
    let workers = config.concurrency.clamp(1, shards.len());

    let mut first_error = None;
    thread::scope(|s| {
        for _ in 0..workers {
            let tx = tx.clone();
            let shards = &shards;
            let cursor = &cursor;
            s.spawn(move || {
                loop {
                    let i = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some((id, name)) = shards.get(i) else {
                        break;
                    };
                    let span = info_span!("shard", db, rp, shard = id);
                    let _entered = span.enter();
                    let result = index_shard(
                        series_file,
                        &data_dir.join(name),
                        &wal_dir.join(name),
                        config.max_log_file_size,
                        config.max_cache_size,
                        config.batch_size,
                        config.verbose,
                    );
                    if let Err(e) = &result {
                        error!(error = %e, "shard rebuild failed");
                    }
                    if tx.send(result).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        for _ in 0..shards.len() {
            match rx.recv() {
                Ok(Err(e)) if first_error.is_none() => first_error = Some(e),
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
