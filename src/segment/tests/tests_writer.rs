//! Segment writer input validation and publication.

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::codec::{self, BlockType, TypedValue, Value};
    use crate::segment::tests::helpers::*;
    use crate::segment::{MAX_BLOCK_VALUES, SegmentError, SegmentReader, SegmentWriter};

    #[test]
    fn finish_publishes_under_tsm_extension() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(tmp.path().join("000000002-000000001")).unwrap();
        assert!(tmp.path().join("000000002-000000001.tsm.tmp").exists());

        writer.write(b"m#f", &floats(0, 1, 4)).unwrap();
        assert_eq!(writer.key_count(), 1);
        assert_eq!(writer.block_type(b"m#f"), Some(BlockType::Float));
        let path = writer.finish().unwrap();

        assert_eq!(path, tmp.path().join("000000002-000000001.tsm"));
        assert!(path.exists());
        assert!(!tmp.path().join("000000002-000000001.tsm.tmp").exists());
    }

    #[test]
    fn empty_segment_is_readable() {
        let tmp = TempDir::new().unwrap();
        let path = SegmentWriter::create(tmp.path().join("empty"))
            .unwrap()
            .finish()
            .unwrap();
        let reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.key_count(), 0);
        assert_eq!(reader.time_range(), None);
        assert!(!reader.contains(b"anything"));
    }

    #[test]
    fn pre_encoded_blocks_are_appended() {
        let tmp = TempDir::new().unwrap();
        let first: Vec<_> = (0..10).map(|i| TypedValue::new(i, i * 2)).collect();
        let second: Vec<_> = (20..30).map(|i| TypedValue::new(i, i * 2)).collect();

        let mut writer = SegmentWriter::create(tmp.path().join("raw")).unwrap();
        writer
            .write_block(b"k#v", 0, 9, &codec::encode_block(&first))
            .unwrap();
        writer
            .write_block(b"k#v", 20, 29, &codec::encode_block(&second))
            .unwrap();
        let path = writer.finish().unwrap();

        let reader = SegmentReader::open(&path).unwrap();
        let entries = reader.entries(b"k#v");
        assert_eq!(entries.len(), 2);
        let mut out = Vec::new();
        reader.read_integer_block_at(&entries[1], &mut out).unwrap();
        assert_eq!(out, second);
    }

    /// # Scenario
    /// Feed the writer each kind of invalid input.
    ///
    /// # Expected behavior
    /// Every call fails with `InvalidInput` and leaves the writer usable.
    #[test]
    fn invalid_input_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(tmp.path().join("bad")).unwrap();

        let err = writer.write(b"k#v", &[]).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidInput(_)), "got {err:?}");

        let unordered = vec![Value::float(5, 1.0), Value::float(4, 2.0)];
        let err = writer.write(b"k#v", &unordered).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidInput(_)), "got {err:?}");

        writer.write(b"k#v", &floats(100, 10, 5)).unwrap();

        // Overlaps the block just written.
        let err = writer.write(b"k#v", &floats(140, 10, 5)).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidInput(_)), "got {err:?}");

        // Different block type for an existing key.
        let err = writer.write(b"k#v", &integers(1000, 1, 2)).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidInput(_)), "got {err:?}");

        let block = codec::encode_values(&floats(0, 1, 2)).unwrap();
        let err = writer.write_block(b"other", 10, 5, &block).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidInput(_)), "got {err:?}");

        // Garbage bytes are not a block.
        let err = writer.write_block(b"other", 0, 1, &[0xee, 0x00]).unwrap_err();
        assert!(matches!(err, SegmentError::CorruptBlock(_)), "got {err:?}");

        writer.write(b"k#v", &floats(200, 10, 5)).unwrap();
        let path = writer.finish().unwrap();
        let reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.entries(b"k#v").len(), 2);
        assert_eq!(reader.key_count(), 1);
    }

    #[test]
    fn mixed_types_in_one_call_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(tmp.path().join("mixed")).unwrap();
        let values = vec![Value::float(1, 1.0), Value::integer(2, 2)];
        let err = writer.write(b"k#v", &values).unwrap_err();
        assert!(matches!(err, SegmentError::Codec(_)), "got {err:?}");
    }

    #[test]
    fn duplicate_timestamps_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(tmp.path().join("dup")).unwrap();
        let values = vec![Value::float(5, 1.0), Value::float(5, 2.0)];
        let err = writer.write(b"k#v", &values).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidInput(_)), "got {err:?}");
        assert_eq!(writer.key_count(), 0);
    }

    /// # Scenario
    /// A full block of values followed by one more value that repeats the
    /// last timestamp, so the duplicate lands at a block boundary.
    ///
    /// # Expected behavior
    /// The call fails with `InvalidInput` and writes nothing: the key is
    /// absent from the published file.
    #[test]
    fn rejected_write_leaves_no_partial_key() {
        let tmp = TempDir::new().unwrap();
        let mut writer = SegmentWriter::create(tmp.path().join("boundary")).unwrap();

        let mut values = floats(0, 1, MAX_BLOCK_VALUES);
        values.push(Value::float(MAX_BLOCK_VALUES as i64 - 1, 9.0));
        let err = writer.write(b"cpu#v", &values).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidInput(_)), "got {err:?}");
        assert_eq!(writer.key_count(), 0);

        // A later call overlapping an existing key is rejected up front too.
        writer.write(b"mem#v", &floats(0, 1, 10)).unwrap();
        let overlapping = floats(5, 1, MAX_BLOCK_VALUES + 5);
        let err = writer.write(b"mem#v", &overlapping).unwrap_err();
        assert!(matches!(err, SegmentError::InvalidInput(_)), "got {err:?}");

        let path = writer.finish().unwrap();
        let reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.key_count(), 1);
        assert!(!reader.contains(b"cpu#v"));
        assert_eq!(reader.entries(b"mem#v").len(), 1);
        assert_eq!(reader.read_all(b"mem#v").unwrap().len(), 10);
    }
}
