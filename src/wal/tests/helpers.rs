use tracing_subscriber::EnvFilter;

use crate::codec::Value;
use crate::encoding::{Decode, Encode};
use crate::wal::{Wal, WalEntry, WalError};

/// Header plus its checksum.
pub const WAL_PREAMBLE_SIZE: u64 = 16;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times; only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Replay every record from the WAL into a `Vec`.
pub fn collect_iter<T: Encode + Decode>(wal: &Wal<T>) -> Result<Vec<T>, WalError> {
    wal.replay_iter()?.collect()
}

pub fn write_entry(key: &str, values: Vec<Value>) -> WalEntry {
    WalEntry::Write {
        values: vec![(key.as_bytes().to_vec(), values)],
    }
}
