//! # tsmstore
//!
//! The columnar segment-file read path and the series-index rebuild
//! pipeline of a time-series storage engine.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tsmstore::{RebuildConfig, rebuild};
//!
//! let config = RebuildConfig {
//!     data_dir: "/var/lib/tsdb/data".into(),
//!     wal_dir: "/var/lib/tsdb/wal".into(),
//!     database_filter: Some("telegraf".into()),
//!     ..RebuildConfig::default()
//! };
//!
//! // Rebuild every shard index of the `telegraf` database, asking on the
//! // terminal before running as root.
//! rebuild::run(&config, rebuild::prompt_root_confirmation).unwrap();
//! ```
//!
//! Reading a segment file directly:
//!
//! ```rust,no_run
//! use tsmstore::segment::SegmentReader;
//!
//! let reader = SegmentReader::open("/var/lib/tsdb/data/db/rp/1/000000001-000000001.tsm").unwrap();
//! for entry in reader.entries(b"cpu,host=a#usage") {
//!     println!("block {}..{} at {}", entry.min_time, entry.max_time, entry.offset);
//! }
//! let values = reader.read_all(b"cpu,host=a#usage").unwrap();
//! reader.close().unwrap();
//! # let _ = values;
//! ```
//!
//! ## Modules
//!
//! - [`codec`] — compressed typed blocks (float, integer, unsigned,
//!   boolean, string).
//! - [`segment`] — segment file format, memory-mapped and buffered block
//!   accessors, reader and writer.
//! - [`wal`] — CRC-protected append-only log files.
//! - [`cache`] — in-memory values replayed from WAL files.
//! - [`series`] — series key parsing and the per-database series file.
//! - [`index`] — the on-disk series index of a shard.
//! - [`rebuild`] — the offline index rebuild pipeline.

pub mod cache;
pub mod codec;
pub mod encoding;
pub mod index;
pub mod rebuild;
pub mod segment;
pub mod series;
pub mod wal;

use std::path::PathBuf;

pub use cache::{Cache, CacheError, CacheLoader};
pub use codec::{BlockType, CodecError, FieldValue, Value};
pub use index::{DiskIndex, IndexError, IndexOptions, SeriesIndex};
pub use rebuild::{RebuildError, index_shard};
pub use segment::{IndexEntry, SegmentError, SegmentReader, SegmentWriter};
pub use series::{SeriesFile, SeriesFileError};

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// 1 GiB.
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 1024 * 1024 * 1024;

/// Configuration of an index rebuild run.
///
/// All fields except the two directories have defaults via
/// [`RebuildConfig::default()`]. The configuration is validated when passed
/// to [`rebuild::run`].
#[derive(Debug, Clone)]
pub struct RebuildConfig {
    /// Root of the data tree: `<data_dir>/<db>/<rp>/<shard>`.
    pub data_dir: PathBuf,

    /// Root of the WAL tree: `<wal_dir>/<db>/<rp>/<shard>`.
    pub wal_dir: PathBuf,

    /// Shards rebuilt in parallel within one retention policy.
    ///
    /// Default: available parallelism. Must be ≥ 1.
    pub concurrency: usize,

    /// Only rebuild this database.
    pub database_filter: Option<String>,

    /// Only rebuild this retention policy.
    pub retention_filter: Option<String>,

    /// Only rebuild this shard id.
    pub shard_filter: Option<String>,

    /// Index log files roll past this size.
    ///
    /// Default: 1 MiB. Must be ≥ 1.
    pub max_log_file_size: u64,

    /// Memory bound of the cache each shard replays its WAL into; 0 means
    /// unbounded.
    ///
    /// Default: 1 GiB.
    pub max_cache_size: u64,

    /// Series per index insert call.
    ///
    /// Default: 10 000. Must be ≥ 1.
    pub batch_size: usize,

    /// Log every series and batch at `info` level.
    pub verbose: bool,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            wal_dir: PathBuf::new(),
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            database_filter: None,
            retention_filter: None,
            shard_filter: None,
            max_log_file_size: index::DEFAULT_MAX_LOG_FILE_SIZE,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            batch_size: rebuild::DEFAULT_BATCH_SIZE,
            verbose: false,
        }
    }
}

impl RebuildConfig {
    /// Validates all configuration parameters.
    pub fn validate(&self) -> Result<(), RebuildError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(RebuildError::InvalidConfig("data_dir must be set".into()));
        }
        if self.wal_dir.as_os_str().is_empty() {
            return Err(RebuildError::InvalidConfig("wal_dir must be set".into()));
        }
        if self.concurrency < 1 {
            return Err(RebuildError::InvalidConfig(
                "concurrency must be >= 1".into(),
            ));
        }
        if self.batch_size < 1 {
            return Err(RebuildError::InvalidConfig(
                "batch_size must be >= 1".into(),
            ));
        }
        if self.max_log_file_size < 1 {
            return Err(RebuildError::InvalidConfig(
                "max_log_file_size must be >= 1".into(),
            ));
        }
        Ok(())
    }
}
