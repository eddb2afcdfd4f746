//! Write-ahead log files.
//!
//! A [`Wal`] is a durable, append-only, CRC-protected log of records of one
//! type. The cache's WAL files, the series file and the disk index's log
//! files all use it.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_BYTES][HEADER_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! ...
//! ```
//!
//! - **Header** — magic, version and maximum record size, followed by a
//!   CRC32 of those bytes.
//! - **Record** — 4-byte little-endian length, the encoded record, and a
//!   CRC32 computed over `len || record_bytes`.
//!
//! # Concurrency model
//!
//! The file handle is shared as `Arc<Mutex<File>>`. [`WalIter`] keeps its own
//! logical offset and seeks before every record, so replay can run next to
//! appends.
//!
//! # Guarantees
//!
//! - **Durability:** `append` and `append_batch` end with `fsync`, and the
//!   file is synced on drop, unless the log was opened with `sync: false`.
//! - **Integrity:** header and record checksums are verified on open and
//!   replay; the first damaged or truncated record ends replay with an
//!   error.

mod entry;

#[cfg(test)]
mod tests;

pub use entry::WalEntry;

use std::{
    ffi::OsStr,
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crc32fast::Hasher as Crc32;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::encoding::{self, Decode, Encode, EncodingError};

const U32_SIZE: usize = std::mem::size_of::<u32>();

/// File extension of cache WAL files.
pub const WAL_FILE_EXTENSION: &str = "wal";

/// Prefix of cache WAL file names (`_00001.wal`).
pub const WAL_FILE_PREFIX: &str = "_";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A record's checksum did not match its bytes.
    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Record size exceeds limit ({0} bytes)")]
    RecordTooLarge(usize),

    /// The file ends in the middle of a record.
    #[error("Unexpected end of file")]
    UnexpectedEof,

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Header
// ------------------------------------------------------------------------------------------------

/// Metadata written at the start of every WAL file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub magic: [u8; 4],
    pub version: u32,
    pub max_record_size: u32,
}

impl WalHeader {
    pub const MAGIC: [u8; 4] = *b"TWAL";
    pub const VERSION: u32 = 1;
    /// 16 MiB; a cache write entry can carry many series.
    pub const DEFAULT_MAX_RECORD_SIZE: u32 = 16 * 1024 * 1024;
    /// Encoded size, without the trailing checksum.
    pub const SIZE: usize = 12;

    pub fn new(max_record_size: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            max_record_size,
        }
    }
}

impl Encode for WalHeader {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.magic.encode_to(buf)?;
        self.version.encode_to(buf)?;
        self.max_record_size.encode_to(buf)?;
        Ok(())
    }
}

impl Decode for WalHeader {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (magic, n) = <[u8; 4]>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = u32::decode_from(&buf[off..])?;
        off += n;
        let (max_record_size, n) = u32::decode_from(&buf[off..])?;
        off += n;
        Ok((
            Self {
                magic,
                version,
                max_record_size,
            },
            off,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// How a WAL file is opened.
#[derive(Debug, Clone, Copy)]
pub struct WalOptions {
    /// Records larger than this are rejected. Only used when creating.
    pub max_record_size: u32,
    /// `fsync` after every append.
    pub sync: bool,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            max_record_size: WalHeader::DEFAULT_MAX_RECORD_SIZE,
            sync: true,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// File naming
// ------------------------------------------------------------------------------------------------

/// `_NNNNN.wal` for sequence `seq`.
pub fn wal_file_name(seq: u64) -> String {
    format!("{WAL_FILE_PREFIX}{seq:05}.{WAL_FILE_EXTENSION}")
}

/// Sequence number of a `_NNNNN.wal` path, if it has that shape.
pub fn parse_wal_seq(path: &Path) -> Option<u64> {
    let name = path.file_name().and_then(OsStr::to_str)?;
    name.strip_prefix(WAL_FILE_PREFIX)?
        .strip_suffix(WAL_FILE_EXTENSION)?
        .strip_suffix('.')?
        .parse::<u64>()
        .ok()
}

// ------------------------------------------------------------------------------------------------
// WAL Core
// ------------------------------------------------------------------------------------------------

/// A thread-safe write-ahead log of `T` records.
///
/// See the [module-level documentation](self) for the format.
#[derive(Debug)]
pub struct Wal<T> {
    inner_file: Arc<Mutex<File>>,
    path: PathBuf,
    header: WalHeader,
    sync: bool,
    read_only: bool,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Encode + Decode> Wal<T> {
    /// Open or create a WAL file with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WalError> {
        Self::open_with(path, WalOptions::default())
    }

    /// Open or create a WAL file for appending.
    pub fn open_with(path: impl AsRef<Path>, options: WalOptions) -> Result<Self, WalError> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let header = if file.metadata()?.len() == 0 {
            let header = WalHeader::new(options.max_record_size);
            let header_bytes = encoding::encode_to_vec(&header)?;
            file.write_all(&header_bytes)?;
            file.write_all(&checksum(&[&header_bytes]).to_le_bytes())?;
            if options.sync {
                file.sync_all()?;
            }
            debug!(path = %path.display(), "created WAL file");
            header
        } else {
            read_header(&mut file)?
        };

        Ok(Self {
            inner_file: Arc::new(Mutex::new(file)),
            path: path.to_path_buf(),
            header,
            sync: options.sync,
            read_only: false,
            _phantom: PhantomData,
        })
    }

    /// Open an existing WAL file for replay only. A missing file is an
    /// `Io` error of kind `NotFound`.
    pub fn open_existing(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let header = read_header(&mut file)?;
        trace!(path = %path.display(), max_record_size = header.max_record_size, "opened WAL file");
        Ok(Self {
            inner_file: Arc::new(Mutex::new(file)),
            path: path.to_path_buf(),
            header,
            sync: false,
            read_only: true,
            _phantom: PhantomData,
        })
    }

    /// Append one record.
    pub fn append(&self, record: &T) -> Result<(), WalError> {
        self.append_batch(std::slice::from_ref(record))
    }

    /// Append several records with a single `fsync`.
    pub fn append_batch(&self, records: &[T]) -> Result<(), WalError> {
        if self.read_only {
            return Err(WalError::Internal("WAL opened read-only".into()));
        }
        if records.is_empty() {
            return Ok(());
        }

        let mut frames = Vec::new();
        let mut record_bytes = Vec::new();
        for record in records {
            record_bytes.clear();
            record.encode_to(&mut record_bytes)?;
            if record_bytes.len() > self.header.max_record_size as usize {
                return Err(WalError::RecordTooLarge(record_bytes.len()));
            }
            let len = (record_bytes.len() as u32).to_le_bytes();
            frames.extend_from_slice(&len);
            frames.extend_from_slice(&record_bytes);
            frames.extend_from_slice(&checksum(&[&len, &record_bytes]).to_le_bytes());
        }

        let mut guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
        guard.write_all(&frames)?;
        if self.sync {
            guard.sync_all()?;
        }

        trace!(
            path = %self.path.display(),
            records = records.len(),
            bytes = frames.len(),
            "appended WAL records"
        );
        Ok(())
    }

    /// Iterator over every record from the start of the file.
    pub fn replay_iter(&self) -> Result<WalIter<T>, WalError> {
        debug!(path = %self.path.display(), "starting WAL replay");
        Ok(WalIter {
            file: Arc::clone(&self.inner_file),
            offset: (WalHeader::SIZE + U32_SIZE) as u64,
            max_record_size: self.header.max_record_size as usize,
            done: false,
            _phantom: PhantomData,
        })
    }

    /// Force buffered appends to disk.
    pub fn sync(&self) -> Result<(), WalError> {
        let guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
        guard.sync_all()?;
        Ok(())
    }

    /// Current file length in bytes.
    pub fn file_size(&self) -> Result<u64, WalError> {
        let guard = self
            .inner_file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
        Ok(guard.metadata()?.len())
    }

    pub fn header(&self) -> &WalHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> Drop for Wal<T> {
    fn drop(&mut self) {
        if self.read_only || !self.sync {
            return;
        }
        match self.inner_file.lock() {
            Ok(guard) => {
                if let Err(e) = guard.sync_all() {
                    error!(path = %self.path.display(), error = %e, "failed to sync WAL on drop");
                }
            }
            Err(poisoned) => {
                let file = poisoned.into_inner();
                if let Err(e) = file.sync_all() {
                    error!(path = %self.path.display(), error = %e, "failed to sync WAL (poisoned) on drop");
                } else {
                    warn!(path = %self.path.display(), "recovered and synced WAL after poisoned lock");
                }
            }
        }
    }
}

fn checksum(parts: &[&[u8]]) -> u32 {
    let mut hasher = Crc32::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// Read and validate the header of an existing file.
fn read_header(file: &mut File) -> Result<WalHeader, WalError> {
    file.seek(SeekFrom::Start(0))?;
    let mut header_bytes = [0u8; WalHeader::SIZE];
    let mut checksum_bytes = [0u8; U32_SIZE];
    file.read_exact(&mut header_bytes)
        .and_then(|_| file.read_exact(&mut checksum_bytes))
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => WalError::InvalidHeader("header truncated".into()),
            _ => WalError::Io(e),
        })?;

    if u32::from_le_bytes(checksum_bytes) != checksum(&[&header_bytes]) {
        return Err(WalError::InvalidHeader("header checksum mismatch".into()));
    }
    let (header, _) = encoding::decode_from_slice::<WalHeader>(&header_bytes)?;
    if header.magic != WalHeader::MAGIC {
        return Err(WalError::InvalidHeader("bad magic".into()));
    }
    if header.version != WalHeader::VERSION {
        return Err(WalError::InvalidHeader(format!(
            "unsupported version {}",
            header.version
        )));
    }
    Ok(header)
}

// ------------------------------------------------------------------------------------------------
// WalIter
// ------------------------------------------------------------------------------------------------

/// Streaming WAL replay iterator.
///
/// Yields one decoded record at a time. After the first error it yields
/// nothing more.
pub struct WalIter<T> {
    file: Arc<Mutex<File>>,
    offset: u64,
    max_record_size: usize,
    done: bool,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: Decode> WalIter<T> {
    fn read_record(&mut self) -> Result<Option<T>, WalError> {
        let mut guard = self
            .file
            .lock()
            .map_err(|_| WalError::Internal("Mutex poisoned".into()))?;
        guard.seek(SeekFrom::Start(self.offset))?;

        let mut len_bytes = [0u8; U32_SIZE];
        match guard.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                // A clean end, unless a partial length prefix is left over.
                let remaining = guard.metadata()?.len().saturating_sub(self.offset);
                if remaining == 0 {
                    trace!("end of WAL reached");
                    return Ok(None);
                }
                error!(offset = self.offset, "truncated WAL record length");
                return Err(WalError::UnexpectedEof);
            }
            Err(e) => return Err(WalError::Io(e)),
        }

        let record_len = u32::from_le_bytes(len_bytes) as usize;
        if record_len > self.max_record_size {
            return Err(WalError::RecordTooLarge(record_len));
        }

        let mut record_bytes = vec![0u8; record_len];
        let mut checksum_bytes = [0u8; U32_SIZE];
        guard
            .read_exact(&mut record_bytes)
            .and_then(|_| guard.read_exact(&mut checksum_bytes))
            .map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    error!(offset = self.offset, "truncated WAL record detected");
                    WalError::UnexpectedEof
                } else {
                    WalError::Io(e)
                }
            })?;
        drop(guard);

        if u32::from_le_bytes(checksum_bytes) != checksum(&[&len_bytes, &record_bytes]) {
            error!(offset = self.offset, record_len, "WAL record checksum mismatch");
            return Err(WalError::ChecksumMismatch);
        }
        self.offset += (U32_SIZE + record_len + U32_SIZE) as u64;

        let (record, consumed) = T::decode_from(&record_bytes)?;
        if consumed != record_len {
            return Err(WalError::Encoding(EncodingError::Custom(format!(
                "record has {} trailing bytes",
                record_len - consumed
            ))));
        }
        Ok(Some(record))
    }
}

impl<T: Decode> Iterator for WalIter<T> {
    type Item = Result<T, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Replay every record of `path` in order; used by loaders that only read.
pub fn read_all<T: Encode + Decode>(path: &Path) -> Result<Vec<T>, WalError> {
    let wal = Wal::<T>::open_existing(path)?;
    let records = wal.replay_iter()?.collect::<Result<Vec<_>, _>>()?;
    info!(path = %path.display(), records = records.len(), "replayed WAL file");
    Ok(records)
}
