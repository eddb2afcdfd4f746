use std::fs;
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::RebuildConfig;
use crate::codec::Value;
use crate::index::{IndexError, SeriesIndex};
use crate::segment::SegmentWriter;
use crate::series::Tags;
use crate::wal::{Wal, WalEntry, wal_file_name};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Index that records every call instead of persisting anything.
#[derive(Debug, Default)]
pub struct RecordingIndex {
    pub events: Vec<&'static str>,
    pub batches: Vec<Vec<Vec<u8>>>,
    pub names: Vec<Vec<u8>>,
    pub tags: Vec<Tags>,
    pub fail_inserts: bool,
}

impl RecordingIndex {
    /// Every inserted series key in insert order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.batches.iter().flatten().cloned().collect()
    }

    pub fn key_strings(&self) -> Vec<String> {
        self.keys()
            .into_iter()
            .map(|k| String::from_utf8(k).unwrap())
            .collect()
    }
}

impl SeriesIndex for RecordingIndex {
    fn open(&mut self) -> Result<(), IndexError> {
        self.events.push("open");
        Ok(())
    }

    fn create_series_list_if_not_exists(
        &mut self,
        keys: &[Vec<u8>],
        names: &[Vec<u8>],
        tags: &[Tags],
    ) -> Result<(), IndexError> {
        assert_eq!(keys.len(), names.len());
        assert_eq!(keys.len(), tags.len());
        if self.fail_inserts {
            return Err(IndexError::InvalidInput("rejected".into()));
        }
        self.events.push("insert");
        self.batches.push(keys.to_vec());
        self.names.extend_from_slice(names);
        self.tags.extend_from_slice(tags);
        Ok(())
    }

    fn compact(&mut self) -> Result<(), IndexError> {
        self.events.push("compact");
        Ok(())
    }

    fn wait(&mut self) {
        self.events.push("wait");
    }

    fn close(&mut self) -> Result<(), IndexError> {
        self.events.push("close");
        Ok(())
    }
}

/// Segment file `<dir>/<name>.tsm` with one block per key over `[1000, 2000]`.
pub fn write_segment(dir: &Path, name: &str, keys: &[&str]) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let mut writer = SegmentWriter::create(dir.join(name)).unwrap();
    let mut sorted = keys.to_vec();
    sorted.sort_unstable();
    for key in sorted {
        writer
            .write(
                key.as_bytes(),
                &[Value::float(1000, 1.0), Value::float(2000, 2.0)],
            )
            .unwrap();
    }
    writer.finish().unwrap()
}

/// WAL file `<dir>/_NNNNN.wal` holding one write entry.
pub fn write_wal(dir: &Path, seq: u64, series: &[(&str, Vec<Value>)]) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(wal_file_name(seq));
    let wal = Wal::open(&path).unwrap();
    wal.append(&WalEntry::Write {
        values: series
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.clone()))
            .collect(),
    })
    .unwrap();
    path
}

/// `(data_dir, wal_dir)` of a shard under `root/data` and `root/wal`. Only
/// the data directory is created.
pub fn shard_dirs(root: &Path, db: &str, rp: &str, shard: &str) -> (PathBuf, PathBuf) {
    let data = root.join("data").join(db).join(rp).join(shard);
    let wal = root.join("wal").join(db).join(rp).join(shard);
    fs::create_dir_all(&data).unwrap();
    (data, wal)
}

pub fn config(root: &Path) -> RebuildConfig {
    RebuildConfig {
        data_dir: root.join("data"),
        wal_dir: root.join("wal"),
        concurrency: 2,
        batch_size: 2,
        ..RebuildConfig::default()
    }
}
