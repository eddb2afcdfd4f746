use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::index::{DiskIndex, IndexOptions, SeriesIndex};
use crate::series::{SeriesFile, Tags, parse_key};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Parallel `keys`, `names` and `tags` for series keys.
pub fn batch(keys: &[&str]) -> (Vec<Vec<u8>>, Vec<Vec<u8>>, Vec<Tags>) {
    let mut out = (Vec::new(), Vec::new(), Vec::new());
    for key in keys {
        let (name, tags) = parse_key(key.as_bytes());
        out.0.push(key.as_bytes().to_vec());
        out.1.push(name);
        out.2.push(tags);
    }
    out
}

pub fn insert(index: &mut DiskIndex, keys: &[&str]) {
    let (keys, names, tags) = batch(keys);
    index
        .create_series_list_if_not_exists(&keys, &names, &tags)
        .unwrap();
}

/// Series file under `root/_series` and an opened index at `root/index`.
pub fn open_index(root: &Path, options: IndexOptions) -> (Arc<SeriesFile>, DiskIndex) {
    let sfile = Arc::new(SeriesFile::open(root.join("_series")).unwrap());
    let mut index = DiskIndex::new(Arc::clone(&sfile), root.join("index"), options);
    index.open().unwrap();
    (sfile, index)
}

/// Options that flush every insert straight to the log.
pub fn unbuffered() -> IndexOptions {
    IndexOptions {
        log_buffer_size: 0,
        disable_fsync: true,
        ..IndexOptions::default()
    }
}

/// Sorted file names in `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
