//! # Cache
//!
//! In-memory store of values not yet written to segment files, keyed by
//! series+field key. It is rebuilt on startup by replaying WAL files
//! through a [`CacheLoader`].
//!
//! ## Semantics
//! - Values of one key are kept sorted by timestamp with one value per
//!   timestamp. When two writes carry the same timestamp, the later write
//!   wins.
//! - A key holds one value type; writing another type fails with
//!   [`CacheError::FieldTypeConflict`].
//! - The cache is bounded by `max_size` bytes (0 = unbounded); a write that
//!   would cross the bound fails with [`CacheError::CacheFull`] and changes
//!   nothing.

mod loader;


pub use loader::CacheLoader;

use std::collections::BTreeMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::{error, trace};

use crate::codec::{BlockType, Value};
use crate::wal::{WalEntry, WalError};

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    /// The write would push the cache past its size bound.
    #[error("cache full: {size} + {incoming} bytes exceeds limit of {max_size}")]
    CacheFull {
        size: u64,
        incoming: u64,
        max_size: u64,
    },

    /// The key already holds values of another type.
    #[error("field type conflict for {key}: cached {existing}, got {found}")]
    FieldTypeConflict {
        key: String,
        existing: BlockType,
        found: BlockType,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Cache Core
// ------------------------------------------------------------------------------------------------

/// Values of one key.
#[derive(Debug)]
struct CacheEntry {
    block_type: BlockType,
    /// Sorted by timestamp, unique timestamps.
    values: Vec<Value>,
    size: u64,
}

impl CacheEntry {
    fn new(block_type: BlockType) -> Self {
        Self {
            block_type,
            values: Vec::new(),
            size: 0,
        }
    }

    /// Merge `incoming` in; on equal timestamps the incoming value wins.
    fn merge(&mut self, incoming: Vec<Value>) {
        let appendable = incoming.windows(2).all(|w| w[0].unix_nano < w[1].unix_nano)
            && match (self.values.last(), incoming.first()) {
                (Some(last), Some(first)) => last.unix_nano < first.unix_nano,
                _ => true,
            };
        self.values.extend(incoming);
        if !appendable {
            // Newest first, so the stable sort keeps the latest write at the
            // head of every run of equal timestamps.
            self.values.reverse();
            self.values.sort_by_key(|v| v.unix_nano);
            self.values.dedup_by_key(|v| v.unix_nano);
        }
        self.size = values_size(&self.values);
    }

    /// Drop values with timestamps in `[min, max]`.
    fn remove_range(&mut self, min: i64, max: i64) {
        self.values
            .retain(|v| v.unix_nano < min || v.unix_nano > max);
        self.size = values_size(&self.values);
    }
}

fn values_size(values: &[Value]) -> u64 {
    values.iter().map(|v| v.size() as u64).sum()
}

/// Display form of a key for errors and logs.
fn key_str(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

struct CacheInner {
    store: BTreeMap<Vec<u8>, CacheEntry>,
    size: u64,
}

/// Thread-safe in-memory value cache.
pub struct Cache {
    inner: RwLock<CacheInner>,
    max_size: u64,
}

impl Cache {
    /// Create an empty cache bounded by `max_size` bytes; 0 means unbounded.
    pub fn new(max_size: u64) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                store: BTreeMap::new(),
                size: 0,
            }),
            max_size,
        }
    }

    fn write_guard(&self) -> Result<std::sync::RwLockWriteGuard<'_, CacheInner>, CacheError> {
        self.inner.write().map_err(|_| {
            error!("Read-write lock poisoned in cache");
            CacheError::Internal("RwLock poisoned".into())
        })
    }

    fn read_guard(&self) -> Result<std::sync::RwLockReadGuard<'_, CacheInner>, CacheError> {
        self.inner.read().map_err(|_| {
            error!("Read-write lock poisoned in cache");
            CacheError::Internal("RwLock poisoned".into())
        })
    }

    /// Write values for one key.
    pub fn write(&self, key: &[u8], values: Vec<Value>) -> Result<(), CacheError> {
        self.write_multi(vec![(key.to_vec(), values)])
    }

    /// Write values for many keys. Either every key is written or none is.
    pub fn write_multi(&self, batch: Vec<(Vec<u8>, Vec<Value>)>) -> Result<(), CacheError> {
        let mut guard = self.write_guard()?;

        let mut incoming = 0u64;
        let mut batch_types: BTreeMap<&[u8], BlockType> = BTreeMap::new();
        for (key, values) in &batch {
            let Some(first) = values.first() else {
                continue;
            };
            let expected = match guard.store.get(key) {
                Some(entry) => entry.block_type,
                None => *batch_types
                    .entry(key.as_slice())
                    .or_insert(first.block_type()),
            };
            if let Some(bad) = values.iter().find(|v| v.block_type() != expected) {
                return Err(CacheError::FieldTypeConflict {
                    key: key_str(key),
                    existing: expected,
                    found: bad.block_type(),
                });
            }
            incoming += values_size(values);
        }
        drop(batch_types);

        if self.max_size > 0 && guard.size + incoming > self.max_size {
            return Err(CacheError::CacheFull {
                size: guard.size,
                incoming,
                max_size: self.max_size,
            });
        }

        let inner = &mut *guard;
        for (key, values) in batch {
            let Some(first) = values.first() else {
                continue;
            };
            let block_type = first.block_type();
            let count = values.len();
            let entry = inner
                .store
                .entry(key)
                .or_insert_with(|| CacheEntry::new(block_type));
            let before = entry.size;
            entry.merge(values);
            inner.size = inner.size - before + entry.size;
            trace!(values = count, size = inner.size, "cache write");
        }
        Ok(())
    }

    /// Remove every value of `keys`.
    pub fn delete(&self, keys: &[Vec<u8>]) -> Result<(), CacheError> {
        let mut guard = self.write_guard()?;
        for key in keys {
            if let Some(entry) = guard.store.remove(key) {
                guard.size -= entry.size;
            }
        }
        Ok(())
    }

    /// Remove values of `keys` with timestamps in `[min, max]`. Keys left
    /// without values disappear.
    pub fn delete_range(&self, keys: &[Vec<u8>], min: i64, max: i64) -> Result<(), CacheError> {
        let mut guard = self.write_guard()?;
        let inner = &mut *guard;
        for key in keys {
            let Some(entry) = inner.store.get_mut(key) else {
                continue;
            };
            let before = entry.size;
            entry.remove_range(min, max);
            inner.size = inner.size - before + entry.size;
            if entry.values.is_empty() {
                inner.store.remove(key);
            }
        }
        Ok(())
    }

    /// Apply one replayed WAL record.
    pub fn apply(&self, entry: WalEntry) -> Result<(), CacheError> {
        match entry {
            WalEntry::Write { values } => self.write_multi(values),
            WalEntry::Delete { keys } => self.delete(&keys),
            WalEntry::DeleteRange { keys, min, max } => self.delete_range(&keys, min, max),
        }
    }

    /// Values of `key` in timestamp order.
    pub fn values(&self, key: &[u8]) -> Result<Vec<Value>, CacheError> {
        let guard = self.read_guard()?;
        Ok(guard
            .store
            .get(key)
            .map(|e| e.values.clone())
            .unwrap_or_default())
    }

    /// Value type cached for `key`.
    pub fn block_type(&self, key: &[u8]) -> Result<Option<BlockType>, CacheError> {
        Ok(self.read_guard()?.store.get(key).map(|e| e.block_type))
    }

    /// Every cached key, sorted and duplicate-free.
    pub fn keys(&self) -> Result<Vec<Vec<u8>>, CacheError> {
        Ok(self.read_guard()?.store.keys().cloned().collect())
    }

    /// Bytes held.
    pub fn size(&self) -> u64 {
        match self.inner.read() {
            Ok(g) => g.size,
            Err(poisoned) => poisoned.into_inner().size,
        }
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        match self.inner.read() {
            Ok(g) => g.store.len(),
            Err(poisoned) => poisoned.into_inner().store.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("keys", &self.len())
            .field("size", &self.size())
            .field("max_size", &self.max_size)
            .finish()
    }
}
