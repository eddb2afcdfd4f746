use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crc32fast::Hasher as Crc32;
use tracing::debug;

use super::IndexError;
use crate::encoding;
use crate::series::SeriesRecord;

const MAGIC: [u8; 4] = *b"TSI1";
const VERSION: u32 = 1;
/// Magic, version and body length.
const PREAMBLE_SIZE: usize = 12;
const CRC_SIZE: usize = 4;

fn crc(bytes: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(bytes);
    hasher.finalize()
}

pub(crate) fn fsync_dir(dir: &Path) -> Result<(), IndexError> {
    let dir_file = File::open(dir)?;
    dir_file.sync_all()?;
    Ok(())
}

/// Write `records` to `path` through a temporary file.
pub(crate) fn write_snapshot(
    path: &Path,
    records: &[SeriesRecord],
    sync: bool,
) -> Result<(), IndexError> {
    let mut body = Vec::new();
    encoding::encode_vec(records, &mut body)?;
    let body_len = u32::try_from(body.len())
        .map_err(|_| IndexError::InvalidInput(format!("snapshot too large: {} bytes", body.len())))?;

    let mut bytes = Vec::with_capacity(PREAMBLE_SIZE + body.len() + CRC_SIZE);
    bytes.extend_from_slice(&MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&body_len.to_le_bytes());
    bytes.extend_from_slice(&body);
    let checksum = crc(&bytes);
    bytes.extend_from_slice(&checksum.to_le_bytes());

    let tmp_path = path.with_extension(format!("{}.tmp", super::SNAPSHOT_FILE_EXTENSION));
    {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        f.write_all(&bytes)?;
        if sync {
            f.sync_all()?;
        }
    }
    fs::rename(&tmp_path, path)?;
    if sync {
        if let Some(dir) = path.parent() {
            fsync_dir(dir)?;
        }
    }

    debug!(path = %path.display(), series = records.len(), bytes = bytes.len(), "index snapshot written");
    Ok(())
}

/// Read and verify a snapshot.
pub(crate) fn read_snapshot(path: &Path) -> Result<Vec<SeriesRecord>, IndexError> {
    let bytes = fs::read(path)?;
    if bytes.len() < PREAMBLE_SIZE + CRC_SIZE {
        return Err(IndexError::Corrupt(format!(
            "{}: snapshot too small ({} bytes)",
            path.display(),
            bytes.len()
        )));
    }

    let (content, stored) = bytes.split_at(bytes.len() - CRC_SIZE);
    let stored = u32::from_le_bytes([stored[0], stored[1], stored[2], stored[3]]);
    if crc(content) != stored {
        return Err(IndexError::Corrupt(format!(
            "{}: checksum mismatch",
            path.display()
        )));
    }
    if content[..4] != MAGIC {
        return Err(IndexError::Corrupt(format!("{}: bad magic", path.display())));
    }
    let version = u32::from_le_bytes([content[4], content[5], content[6], content[7]]);
    if version != VERSION {
        return Err(IndexError::Corrupt(format!(
            "{}: unsupported version {version}",
            path.display()
        )));
    }
    let body_len = u32::from_le_bytes([content[8], content[9], content[10], content[11]]) as usize;
    let body = &content[PREAMBLE_SIZE..];
    if body.len() != body_len {
        return Err(IndexError::Corrupt(format!(
            "{}: body length {body_len}, file holds {}",
            path.display(),
            body.len()
        )));
    }

    let (records, used) = encoding::decode_vec::<SeriesRecord>(body)?;
    if used != body.len() {
        return Err(IndexError::Corrupt(format!(
            "{}: {} trailing bytes",
            path.display(),
            body.len() - used
        )));
    }
    Ok(records)
}
