//! WAL append / replay / reopen tests.
//!
//! Coverage:
//! - Single and batched appends replay in order
//! - Reopening an existing file keeps its records and accepts more
//! - Read-only handles replay but refuse appends
//! - Record size limit
//! - `_NNNNN.wal` file naming

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::TempDir;

    use crate::codec::Value;
    use crate::wal::tests::helpers::*;
    use crate::wal::{
        Wal, WalEntry, WalError, WalHeader, WalOptions, parse_wal_seq, read_all, wal_file_name,
    };

    #[test]
    fn append_and_replay() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(wal_file_name(1));
        let wal = Wal::open(&path).unwrap();

        let entries = vec![
            write_entry("cpu,host=a#value", vec![Value::float(1, 0.5), Value::float(2, 1.5)]),
            WalEntry::Delete {
                keys: vec![b"cpu,host=b#value".to_vec()],
            },
            WalEntry::DeleteRange {
                keys: vec![b"mem#free".to_vec(), b"mem#used".to_vec()],
                min: -10,
                max: 10,
            },
        ];
        for entry in &entries {
            wal.append(entry).unwrap();
        }

        assert_eq!(collect_iter(&wal).unwrap(), entries);
        // Replay can run again from the start.
        assert_eq!(collect_iter(&wal).unwrap().len(), 3);
    }

    #[test]
    fn append_batch_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.tsl");
        {
            let wal: Wal<Vec<u8>> = Wal::open(&path).unwrap();
            wal.append_batch(&[b"a".to_vec(), b"bb".to_vec()]).unwrap();
            wal.append_batch(&[]).unwrap();
        }
        let wal: Wal<Vec<u8>> = Wal::open(&path).unwrap();
        wal.append(&b"ccc".to_vec()).unwrap();
        assert_eq!(
            collect_iter(&wal).unwrap(),
            vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]
        );
        assert_eq!(
            wal.file_size().unwrap(),
            WAL_PREAMBLE_SIZE + (4 + 4 + 1 + 4) + (4 + 4 + 2 + 4) + (4 + 4 + 3 + 4)
        );
    }

    #[test]
    fn empty_log_replays_nothing() {
        let tmp = TempDir::new().unwrap();
        let wal: Wal<Vec<u8>> = Wal::open(tmp.path().join("empty.wal")).unwrap();
        assert!(collect_iter(&wal).unwrap().is_empty());
        assert_eq!(wal.file_size().unwrap(), WAL_PREAMBLE_SIZE);
        assert_eq!(*wal.header(), WalHeader::new(WalHeader::DEFAULT_MAX_RECORD_SIZE));
    }

    #[test]
    fn read_only_handle() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(wal_file_name(7));
        Wal::<Vec<u8>>::open(&path)
            .unwrap()
            .append(&b"x".to_vec())
            .unwrap();

        let wal = Wal::<Vec<u8>>::open_existing(&path).unwrap();
        assert_eq!(collect_iter(&wal).unwrap(), vec![b"x".to_vec()]);
        assert!(matches!(
            wal.append(&b"y".to_vec()),
            Err(WalError::Internal(_))
        ));
        assert_eq!(read_all::<Vec<u8>>(&path).unwrap(), vec![b"x".to_vec()]);

        let missing = Wal::<Vec<u8>>::open_existing(tmp.path().join("missing.wal")).unwrap_err();
        assert!(
            matches!(&missing, WalError::Io(e) if e.kind() == std::io::ErrorKind::NotFound),
            "got {missing:?}"
        );
    }

    #[test]
    fn record_size_limit() {
        let tmp = TempDir::new().unwrap();
        let options = WalOptions {
            max_record_size: 16,
            sync: false,
        };
        let wal: Wal<Vec<u8>> = Wal::open_with(tmp.path().join("small.wal"), options).unwrap();
        wal.append(&vec![1u8; 12]).unwrap();
        let err = wal.append(&vec![1u8; 13]).unwrap_err();
        assert!(matches!(err, WalError::RecordTooLarge(17)), "got {err:?}");
        assert_eq!(collect_iter(&wal).unwrap().len(), 1);
    }

    #[test]
    fn file_names() {
        assert_eq!(wal_file_name(1), "_00001.wal");
        assert_eq!(wal_file_name(123456), "_123456.wal");
        assert_eq!(parse_wal_seq(Path::new("/x/_00042.wal")), Some(42));
        assert_eq!(parse_wal_seq(Path::new("_00042.tsm")), None);
        assert_eq!(parse_wal_seq(Path::new("00042.wal")), None);
        assert_eq!(parse_wal_seq(Path::new("_abc.wal")), None);
    }
}
