//! WAL corruption detection tests.
//!
//! Coverage:
//! - Header checksum mismatch → `WalError::InvalidHeader`
//! - Header cut short → `WalError::InvalidHeader`
//! - Record length overwritten with a huge value → `WalError::RecordTooLarge`
//! - Record payload damage → `WalError::ChecksumMismatch`
//! - Truncated final record → `WalError::UnexpectedEof` after the valid ones

#[cfg(test)]
mod tests {
    use std::fs::{self, OpenOptions};
    use std::io::{Seek, SeekFrom, Write};

    use tempfile::TempDir;

    use crate::wal::tests::helpers::*;
    use crate::wal::{Wal, WalError};

    fn overwrite(path: &std::path::Path, pos: u64, bytes: &[u8]) {
        let mut f = OpenOptions::new().write(true).open(path).unwrap();
        f.seek(SeekFrom::Start(pos)).unwrap();
        f.write_all(bytes).unwrap();
        f.sync_all().unwrap();
    }

    /// # Scenario
    /// A single byte inside the WAL header is flipped.
    ///
    /// # Expected behavior
    /// Reopening fails with `InvalidHeader` mentioning the checksum.
    #[test]
    fn corrupted_header_checksum() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("_00001.wal");
        drop(Wal::<Vec<u8>>::open(&path).unwrap());

        overwrite(&path, 2, &[0x99]);

        let err = Wal::<Vec<u8>>::open(&path).unwrap_err();
        assert!(matches!(err, WalError::InvalidHeader(_)));
        assert!(err.to_string().contains("header checksum mismatch"));
        let err = Wal::<Vec<u8>>::open_existing(&path).unwrap_err();
        assert!(matches!(err, WalError::InvalidHeader(_)));
    }

    #[test]
    fn truncated_header() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("_00001.wal");
        fs::write(&path, b"TWAL\x01").unwrap();
        let err = Wal::<Vec<u8>>::open_existing(&path).unwrap_err();
        assert!(matches!(err, WalError::InvalidHeader(_)), "got {err:?}");
    }

    #[test]
    fn corrupted_record_length() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("_00001.wal");
        let wal: Wal<Vec<u8>> = Wal::open(&path).unwrap();
        wal.append(&b"payload".to_vec()).unwrap();

        overwrite(&path, WAL_PREAMBLE_SIZE, &[0xFF, 0xFF, 0xFF, 0xFF]);

        let err = collect_iter(&wal).unwrap_err();
        assert!(matches!(err, WalError::RecordTooLarge(_)), "got {err:?}");
    }

    /// # Scenario
    /// Two records are appended, then one payload byte of the second is
    /// overwritten.
    ///
    /// # Expected behavior
    /// Replay yields the first record, then `ChecksumMismatch`, then stops.
    #[test]
    fn corrupted_record_payload() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("_00001.wal");
        let wal: Wal<Vec<u8>> = Wal::open(&path).unwrap();
        wal.append(&b"first".to_vec()).unwrap();
        wal.append(&b"second".to_vec()).unwrap();

        let second_start = WAL_PREAMBLE_SIZE + 4 + (4 + 5) + 4;
        overwrite(&path, second_start + 4 + 4 + 1, b"X");

        let mut iter = wal.replay_iter().unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), b"first".to_vec());
        assert!(matches!(iter.next(), Some(Err(WalError::ChecksumMismatch))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn truncated_final_record() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("_00001.wal");
        {
            let wal: Wal<Vec<u8>> = Wal::open(&path).unwrap();
            wal.append(&b"kept".to_vec()).unwrap();
            wal.append(&b"lost".to_vec()).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();

        for cut in [len - 1, len - 6, len - 12] {
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len(cut).unwrap();
            drop(file);

            let wal = Wal::<Vec<u8>>::open_existing(&path).unwrap();
            let mut iter = wal.replay_iter().unwrap();
            assert_eq!(iter.next().unwrap().unwrap(), b"kept".to_vec());
            let err = iter.next().unwrap().unwrap_err();
            assert!(matches!(err, WalError::UnexpectedEof), "cut {cut}: got {err:?}");
        }
    }
}
