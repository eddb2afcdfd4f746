//! # Series Index
//!
//! The searchable series index of one shard, and the [`SeriesIndex`] trait
//! the rebuild pipeline writes through.
//!
//! ## Directory layout
//!
//! ```text
//! <shard>/index/
//!   L0-00003.tsl      log: WAL of SeriesRecord { id, key }
//!   L0-00004.tsl      log rolled after max_log_file_size
//!   L1-00002.tsi      compacted snapshot of every series up to seq 2
//! ```
//!
//! All files share one sequence counter. On open the newest snapshot is
//! loaded and every log with a higher sequence is replayed on top of it;
//! logs and snapshots below the newest snapshot are leftovers of an
//! interrupted compaction and are removed.
//!
//! ## Snapshot file
//!
//! ```text
//! [MAGIC "TSI1"][VERSION u32][BODY_LEN u32][BODY][CRC32 u32]
//! ```
//!
//! `BODY` is the encoded `Vec<SeriesRecord>` sorted by id. The CRC covers
//! every preceding byte. Snapshots are written to `<name>.tmp`, synced and
//! renamed into place, then the directory is synced.

mod disk;
mod snapshot;

#[cfg(test)]
mod tests;

pub use disk::DiskIndex;

use std::ffi::OsStr;
use std::path::Path;

use thiserror::Error;

use crate::encoding::EncodingError;
use crate::series::{SeriesFileError, Tags};
use crate::wal::WalError;

/// Extension of index log files.
pub const LOG_FILE_EXTENSION: &str = "tsl";

/// Extension of compacted index snapshots.
pub const SNAPSHOT_FILE_EXTENSION: &str = "tsi";

/// 1 MiB.
pub const DEFAULT_MAX_LOG_FILE_SIZE: u64 = 1024 * 1024;

pub const DEFAULT_LOG_BUFFER_SIZE: usize = 4096;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("series file error: {0}")]
    SeriesFile(#[from] SeriesFileError),

    /// A snapshot failed validation.
    #[error("corrupt index file: {0}")]
    Corrupt(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The index is not open.
    #[error("index is closed")]
    Closed,

    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct IndexOptions {
    /// The active log is rolled once it grows past this many bytes.
    pub max_log_file_size: u64,
    /// Inserted series are buffered in memory until this many bytes are
    /// pending, then appended to the log in one write.
    pub log_buffer_size: usize,
    /// Skip every `fsync` of logs, snapshots and the directory.
    pub disable_fsync: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_log_file_size: DEFAULT_MAX_LOG_FILE_SIZE,
            log_buffer_size: DEFAULT_LOG_BUFFER_SIZE,
            disable_fsync: false,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// SeriesIndex trait
// ------------------------------------------------------------------------------------------------

/// Lifecycle and insert contract of a shard's series index.
pub trait SeriesIndex: Send {
    fn open(&mut self) -> Result<(), IndexError>;

    /// Insert every series not yet present. `keys`, `names` and `tags` are
    /// parallel and must have equal lengths, else
    /// [`IndexError::InvalidInput`]. Re-inserting a known series is a
    /// no-op.
    fn create_series_list_if_not_exists(
        &mut self,
        keys: &[Vec<u8>],
        names: &[Vec<u8>],
        tags: &[Tags],
    ) -> Result<(), IndexError>;

    /// Start a compaction. Failures of the compaction itself surface at
    /// [`close`](Self::close).
    fn compact(&mut self) -> Result<(), IndexError>;

    /// Block until running compactions finish.
    fn wait(&mut self);

    fn close(&mut self) -> Result<(), IndexError>;
}

// ------------------------------------------------------------------------------------------------
// File naming
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IndexFileKind {
    Log,
    Snapshot,
}

pub(crate) fn log_file_name(seq: u64) -> String {
    format!("L0-{seq:05}.{LOG_FILE_EXTENSION}")
}

pub(crate) fn snapshot_file_name(seq: u64) -> String {
    format!("L1-{seq:05}.{SNAPSHOT_FILE_EXTENSION}")
}

/// Kind and sequence of an index file name, if it is one.
pub(crate) fn parse_index_file(path: &Path) -> Option<(IndexFileKind, u64)> {
    let name = path.file_name().and_then(OsStr::to_str)?;
    let (kind, rest) = if let Some(rest) = name.strip_prefix("L0-") {
        (IndexFileKind::Log, rest.strip_suffix(LOG_FILE_EXTENSION)?)
    } else if let Some(rest) = name.strip_prefix("L1-") {
        (IndexFileKind::Snapshot, rest.strip_suffix(SNAPSHOT_FILE_EXTENSION)?)
    } else {
        return None;
    };
    let seq = rest.strip_suffix('.')?.parse::<u64>().ok()?;
    Some((kind, seq))
}
