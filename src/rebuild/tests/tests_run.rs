//! Driver-level traversal: databases, retention policies, shard workers.

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;

    use tempfile::TempDir;

    use crate::rebuild::tests::helpers::*;
    use crate::rebuild::{RebuildError, confirm_with, is_root, run};

    fn segment_shard(root: &Path, db: &str, rp: &str, shard: &str) -> std::path::PathBuf {
        let (data, _) = shard_dirs(root, db, rp, shard);
        let key = format!("cpu,shard={shard}#value");
        write_segment(&data, "000000001-000000001", &[key.as_str()]);
        data
    }

    fn indexed(data: &Path) -> bool {
        data.join("index").is_dir()
    }

    /// # Scenario
    /// Two databases, two retention policies and a non-numeric directory
    /// among the shards; the run is filtered to one database and one
    /// retention policy.
    ///
    /// # Expected behavior
    /// Only the numeric shards of the selected retention policy get an
    /// index, and the database gets a series file.
    #[test]
    fn database_and_retention_filters() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let s1 = segment_shard(tmp.path(), "db1", "rp1", "1");
        let s2 = segment_shard(tmp.path(), "db1", "rp1", "2");
        let odd = segment_shard(tmp.path(), "db1", "rp1", "notashard");
        let other_rp = segment_shard(tmp.path(), "db1", "rp2", "4");
        let other_db = segment_shard(tmp.path(), "db2", "rp1", "3");
        fs::write(tmp.path().join("data").join("stray-file"), b"").unwrap();

        let config = crate::RebuildConfig {
            database_filter: Some("db1".into()),
            retention_filter: Some("rp1".into()),
            ..config(tmp.path())
        };
        run(&config, || true).unwrap();

        assert!(indexed(&s1));
        assert!(indexed(&s2));
        assert!(!indexed(&odd));
        assert!(!indexed(&other_rp));
        assert!(!indexed(&other_db));
        assert!(tmp.path().join("data/db1/_series/series.wal").is_file());
        assert!(!tmp.path().join("data/db2/_series").exists());
    }

    #[test]
    fn shard_filter() {
        let tmp = TempDir::new().unwrap();
        let s1 = segment_shard(tmp.path(), "db", "rp", "1");
        let s2 = segment_shard(tmp.path(), "db", "rp", "2");

        let config = crate::RebuildConfig {
            shard_filter: Some("2".into()),
            ..config(tmp.path())
        };
        run(&config, || true).unwrap();
        assert!(!indexed(&s1));
        assert!(indexed(&s2));
    }

    /// # Scenario
    /// Three shards share a pool of two workers; shard 2 has a WAL path
    /// that is a regular file, so its rebuild fails.
    ///
    /// # Expected behavior
    /// `run` returns shard 2's error, shards 1 and 3 are still published,
    /// and shard 2 has no `index`.
    #[test]
    fn first_error_returned_after_siblings_finish() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let s1 = segment_shard(tmp.path(), "db", "rp", "1");
        let s2 = segment_shard(tmp.path(), "db", "rp", "2");
        let s3 = segment_shard(tmp.path(), "db", "rp", "3");
        let bad_wal = tmp.path().join("wal/db/rp/2");
        fs::create_dir_all(bad_wal.parent().unwrap()).unwrap();
        fs::write(&bad_wal, b"").unwrap();

        let err = run(&config(tmp.path()), || true).unwrap_err();
        assert!(matches!(err, RebuildError::Cache(_)), "got {err:?}");
        assert!(indexed(&s1));
        assert!(!indexed(&s2));
        assert!(indexed(&s3));
    }

    #[test]
    fn rerun_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let s1 = segment_shard(tmp.path(), "db", "rp", "1");
        run(&config(tmp.path()), || true).unwrap();
        let marker = s1.join("index").join("marker");
        fs::write(&marker, b"keep").unwrap();

        run(&config(tmp.path()), || true).unwrap();
        assert_eq!(fs::read(&marker).unwrap(), b"keep");
    }

    #[test]
    fn invalid_config_and_missing_data_dir() {
        let tmp = TempDir::new().unwrap();
        let bad = crate::RebuildConfig {
            batch_size: 0,
            ..config(tmp.path())
        };
        assert!(matches!(run(&bad, || true), Err(RebuildError::InvalidConfig(_))));

        let missing = crate::RebuildConfig {
            data_dir: tmp.path().join("nope"),
            ..config(tmp.path())
        };
        assert!(matches!(run(&missing, || true), Err(RebuildError::Io(_))));
    }

    #[test]
    fn root_must_confirm() {
        let tmp = TempDir::new().unwrap();
        let s1 = segment_shard(tmp.path(), "db", "rp", "1");
        if is_root() {
            assert!(matches!(
                run(&config(tmp.path()), || false),
                Err(RebuildError::Aborted)
            ));
            assert!(!indexed(&s1));
        } else {
            run(&config(tmp.path()), || panic!("confirmation asked as non-root")).unwrap();
            assert!(indexed(&s1));
        }
    }

    #[test]
    fn confirmation_answers() {
        for (answer, expected) in [
            ("y\n", true),
            ("Yes\n", true),
            ("  Y  \n", true),
            ("n\n", false),
            ("\n", false),
            ("", false),
            ("maybe\n", false),
        ] {
            let mut output = Vec::new();
            let got = confirm_with(&mut Cursor::new(answer.as_bytes()), &mut output);
            assert_eq!(got, expected, "answer {answer:?}");
            assert!(String::from_utf8(output).unwrap().ends_with("(y/N): "));
        }
    }
}
