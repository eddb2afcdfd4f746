use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::codec::Value;
use crate::segment::SegmentWriter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `n` float values starting at `start`, `step` nanoseconds apart.
pub fn floats(start: i64, step: i64, n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| Value::float(start + step * i as i64, i as f64 * 0.5))
        .collect()
}

pub fn integers(start: i64, step: i64, n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| Value::integer(start + step * i as i64, i as i64 - 7))
        .collect()
}

/// Write a segment file named `name` in `dir` holding `series`.
pub fn write_segment(dir: &Path, name: &str, series: &[(&str, Vec<Value>)]) -> PathBuf {
    let mut writer = SegmentWriter::create(dir.join(name)).unwrap();
    for (key, values) in series {
        writer.write(key.as_bytes(), values).unwrap();
    }
    writer.finish().unwrap()
}

/// The two-key file used across these tests: `cpu,host=a#value` and
/// `cpu,host=b#value`, each one float block over `[1000, 2000]`.
pub fn cpu_segment(dir: &Path) -> PathBuf {
    write_segment(
        dir,
        "000000001-000000001",
        &[
            ("cpu,host=a#value", floats(1000, 100, 11)),
            ("cpu,host=b#value", floats(1000, 250, 5)),
        ],
    )
}
