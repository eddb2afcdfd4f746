//! # Series
//!
//! Series key parsing and the per-database **series file**, which hands out
//! stable numeric ids for series keys.
//!
//! ## Series file layout
//!
//! ```text
//! <db>/_series/series.wal      WAL of SeriesRecord { id, key }
//! ```
//!
//! Ids start at 1 and grow by one per new series. The file is shared by
//! every shard worker of a database through an `Arc`; all state sits behind
//! one `Mutex`.

mod file;
mod key;

#[cfg(test)]
mod tests;

pub use file::SeriesFile;
pub use key::{
    FIELD_SEPARATOR, Tag, Tags, composite_key, escape, make_key, parse_key, series_and_field,
    unescape,
};

use thiserror::Error;

use crate::encoding::{Decode, Encode, EncodingError};
use crate::wal::WalError;

/// Directory of the series file inside a database directory.
pub const SERIES_FILE_DIRECTORY: &str = "_series";

/// Log file name inside [`SERIES_FILE_DIRECTORY`].
pub const SERIES_LOG_FILE: &str = "series.wal";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SeriesFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// Replayed ids are not dense and increasing.
    #[error("corrupt series file: {0}")]
    Corrupt(String),

    #[error("series file is closed")]
    Closed,

    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

/// A series id bound to its key. Series file logs and disk index logs hold
/// these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRecord {
    pub id: u64,
    pub key: Vec<u8>,
}

impl Encode for SeriesRecord {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.id.encode_to(buf)?;
        self.key.encode_to(buf)
    }
}

impl Decode for SeriesRecord {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (id, n) = u64::decode_from(buf)?;
        let (key, m) = Vec::<u8>::decode_from(&buf[n..])?;
        Ok((Self { id, key }, n + m))
    }
}
