//! Segment open / index / typed-read tests.
//!
//! Coverage:
//! - Index enumeration (key order, block types, time range)
//! - Point-in-time and whole-key reads
//! - Typed and columnar reads against the generic path
//! - Multi-block keys written in chunks of `MAX_BLOCK_VALUES`

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::codec::{BlockType, FloatArray, IntegerArray, TypedValue, Value};
    use crate::segment::tests::helpers::*;
    use crate::segment::{MAX_BLOCK_VALUES, SegmentReader};

    /// # Scenario
    /// Open the two-key cpu file and inspect its index.
    ///
    /// # Expected behavior
    /// Keys come back in byte order, each with a single float block
    /// spanning `[1000, 2000]`.
    #[test]
    fn index_lists_keys_and_entries() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = cpu_segment(tmp.path());

        let reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.key_count(), 2);
        assert_eq!(
            reader.key_at(0),
            Some((&b"cpu,host=a#value"[..], BlockType::Float))
        );
        assert_eq!(
            reader.key_at(1),
            Some((&b"cpu,host=b#value"[..], BlockType::Float))
        );
        assert_eq!(reader.key_at(2), None);

        let entries = reader.entries(b"cpu,host=a#value");
        assert_eq!(entries.len(), 1);
        assert_eq!((entries[0].min_time, entries[0].max_time), (1000, 2000));

        assert!(reader.contains(b"cpu,host=b#value"));
        assert!(!reader.contains(b"cpu,host=c#value"));
        assert!(reader.entries(b"cpu,host=c#value").is_empty());
        assert_eq!(reader.time_range(), Some((1000, 2000)));
        assert_eq!(reader.path(), path);
        assert_eq!(reader.size().unwrap(), std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn keys_are_sorted_regardless_of_write_order() {
        let tmp = TempDir::new().unwrap();
        let path = write_segment(
            tmp.path(),
            "unordered",
            &[
                ("zeta#f", floats(0, 1, 3)),
                ("alpha#f", floats(0, 1, 3)),
                ("mid#f", integers(0, 1, 3)),
            ],
        );
        let reader = SegmentReader::open(&path).unwrap();
        let keys: Vec<&[u8]> = reader.keys().collect();
        assert_eq!(keys, vec![&b"alpha#f"[..], b"mid#f", b"zeta#f"]);
        assert_eq!(reader.block_type(b"mid#f"), Some(BlockType::Integer));
        assert_eq!(reader.block_type(b"nope"), None);
    }

    /// # Scenario
    /// Read values back through the generic path.
    ///
    /// # Expected behavior
    /// `read` returns the block covering the timestamp, or nothing when no
    /// block does; `read_all` returns every value.
    #[test]
    fn read_and_read_all() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = cpu_segment(tmp.path());
        let reader = SegmentReader::open(&path).unwrap();

        let expected = floats(1000, 100, 11);
        assert_eq!(reader.read(b"cpu,host=a#value", 1500).unwrap(), expected);
        assert_eq!(reader.read(b"cpu,host=a#value", 1000).unwrap(), expected);
        assert!(reader.read(b"cpu,host=a#value", 2001).unwrap().is_empty());
        assert!(reader.read(b"missing", 1500).unwrap().is_empty());

        assert_eq!(
            reader.read_all(b"cpu,host=b#value").unwrap(),
            floats(1000, 250, 5)
        );
        assert!(reader.read_all(b"missing").unwrap().is_empty());
    }

    #[test]
    fn multi_block_key_is_chunked() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let n = MAX_BLOCK_VALUES * 2 + 500;
        let values = integers(0, 10, n);
        let path = write_segment(tmp.path(), "chunked", &[("disk#used", values.clone())]);
        let reader = SegmentReader::open(&path).unwrap();

        let entries = reader.entries(b"disk#used");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].min_time, 0);
        assert_eq!(entries[0].max_time, (MAX_BLOCK_VALUES as i64 - 1) * 10);
        assert_eq!(entries[1].min_time, MAX_BLOCK_VALUES as i64 * 10);
        assert_eq!(entries[2].max_time, (n as i64 - 1) * 10);

        // A timestamp in the middle block returns exactly that block.
        let middle = reader.read(b"disk#used", entries[1].min_time + 10).unwrap();
        assert_eq!(middle.len(), MAX_BLOCK_VALUES);
        assert_eq!(middle[0], values[MAX_BLOCK_VALUES]);

        assert_eq!(reader.read_all(b"disk#used").unwrap(), values);
    }

    /// # Scenario
    /// Typed, columnar and generic reads of the same block.
    ///
    /// # Expected behavior
    /// All three views agree; the columnar read reuses the caller's array.
    #[test]
    fn typed_reads_agree_with_generic_reads() {
        let tmp = TempDir::new().unwrap();
        let strings: Vec<Value> = (0..50)
            .map(|i| Value::string(i * 7, format!("host-{}", i % 4)))
            .collect();
        let bools: Vec<Value> = (0..50).map(|i| Value::boolean(i, i % 3 == 0)).collect();
        let uints: Vec<Value> = (0..50).map(|i| Value::unsigned(i, (i as u64) << 40)).collect();
        let path = write_segment(
            tmp.path(),
            "typed",
            &[
                ("f#f", floats(10, 10, 50)),
                ("i#i", integers(10, 10, 50)),
                ("s#s", strings.clone()),
                ("b#b", bools.clone()),
                ("u#u", uints.clone()),
            ],
        );
        let reader = SegmentReader::open(&path).unwrap();

        let entry = reader.entries(b"f#f")[0];
        let mut typed = Vec::new();
        reader.read_float_block_at(&entry, &mut typed).unwrap();
        let mut array = FloatArray::with_capacity(4);
        array.timestamps.push(-1);
        reader.read_float_array_block_at(&entry, &mut array).unwrap();
        assert_eq!(array.to_values(), typed);
        let mut generic = Vec::new();
        reader.read_block_at(&entry, &mut generic).unwrap();
        let lifted: Vec<Value> = typed
            .iter()
            .map(|v| Value::float(v.unix_nano, v.value))
            .collect();
        assert_eq!(generic, lifted);

        let entry = reader.entries(b"i#i")[0];
        let mut ints = Vec::new();
        reader.read_integer_block_at(&entry, &mut ints).unwrap();
        assert_eq!(ints[0], TypedValue::new(10, -7));
        let mut array = IntegerArray::new();
        reader.read_integer_array_block_at(&entry, &mut array).unwrap();
        assert_eq!(array.len(), 50);
        assert_eq!(array.max_time(), Some(500));

        let entry = reader.entries(b"s#s")[0];
        let mut strs = Vec::new();
        reader.read_string_block_at(&entry, &mut strs).unwrap();
        assert_eq!(strs[5].value, b"host-1".to_vec());
        let mut array = Default::default();
        reader.read_string_array_block_at(&entry, &mut array).unwrap();
        assert_eq!(array.to_values(), strs);

        let entry = reader.entries(b"b#b")[0];
        let mut bs = Vec::new();
        reader.read_boolean_block_at(&entry, &mut bs).unwrap();
        assert_eq!(bs.iter().filter(|v| v.value).count(), 17);
        let mut array = Default::default();
        reader.read_boolean_array_block_at(&entry, &mut array).unwrap();
        assert_eq!(array.to_values(), bs);

        let entry = reader.entries(b"u#u")[0];
        let mut us = Vec::new();
        reader.read_unsigned_block_at(&entry, &mut us).unwrap();
        assert_eq!(us[49].value, 49u64 << 40);
        let mut array = Default::default();
        reader.read_unsigned_array_block_at(&entry, &mut array).unwrap();
        assert_eq!(array.to_values(), us);
    }

    #[test]
    fn typed_read_of_wrong_type_fails() {
        let tmp = TempDir::new().unwrap();
        let path = cpu_segment(tmp.path());
        let reader = SegmentReader::open(&path).unwrap();
        let entry = reader.entries(b"cpu,host=a#value")[0];

        let mut out = Vec::new();
        let err = reader.read_integer_block_at(&entry, &mut out).unwrap_err();
        assert!(
            matches!(
                err,
                crate::segment::SegmentError::Codec(crate::codec::CodecError::TypeMismatch { .. })
            ),
            "got {err:?}"
        );
    }
}
