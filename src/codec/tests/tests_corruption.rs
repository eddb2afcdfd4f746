//! Malformed blocks: every failure is a `CorruptBlock` (or a type
//! mismatch), never a panic or an out-of-bounds read.

#[cfg(test)]
mod tests {
    use crate::codec::*;

    fn float_block() -> Vec<u8> {
        let values: Vec<FloatValue> = (0..20)
            .map(|i| TypedValue::new(1_000 + i * 37, (i as f64).sqrt()))
            .collect();
        encode_block(&values)
    }

    fn sample_blocks() -> Vec<Vec<u8>> {
        let ints: Vec<IntegerValue> = (0..20).map(|i| TypedValue::new(i * 3, i * i - 50)).collect();
        let uints: Vec<UnsignedValue> = (0..20).map(|i| TypedValue::new(i * 3, i as u64 * 1000)).collect();
        let bools: Vec<BooleanValue> = (0..20).map(|i| TypedValue::new(i * 3, i % 2 == 0)).collect();
        let strs: Vec<StringValue> = (0..20)
            .map(|i| TypedValue::new(i * 3, format!("v{i}").into_bytes()))
            .collect();
        vec![
            float_block(),
            encode_block(&ints),
            encode_block(&uints),
            encode_block(&bools),
            encode_block(&strs),
            encode_block_with(&ints, TimestampEncoding::Raw, ValueEncoding::Raw),
            encode_block_with(&bools, TimestampEncoding::Raw, ValueEncoding::Raw),
            encode_block_with(&strs, TimestampEncoding::Delta, ValueEncoding::Raw),
        ]
    }

    fn assert_corrupt(block: &[u8]) {
        let mut out = Vec::new();
        match decode_values(block, &mut out) {
            Err(CodecError::CorruptBlock(_)) => {}
            other => panic!("expected CorruptBlock, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_marker() {
        let mut block = float_block();
        block[0] = 0x09;
        assert_corrupt(&block);

        let mut out = Vec::new();
        assert!(matches!(
            decode_block::<f64>(&block, &mut out),
            Err(CodecError::CorruptBlock(_))
        ));
        assert!(matches!(block_type(&block), Err(CodecError::CorruptBlock(_))));
    }

    #[test]
    fn unknown_scheme_nibbles() {
        let mut block = float_block();
        block[1] = (0x3 << 4) | (ValueEncoding::Packed as u8);
        assert_corrupt(&block);

        let mut block = float_block();
        block[1] = (block[1] & 0xF0) | 0x2;
        assert_corrupt(&block);
    }

    #[test]
    fn every_truncation_is_rejected() {
        for block in sample_blocks() {
            for len in 0..block.len() {
                assert_corrupt(&block[..len]);
            }
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        for block in sample_blocks() {
            let mut longer = block.clone();
            longer.push(0);
            assert_corrupt(&longer);
        }
    }

    #[test]
    fn count_larger_than_payload() {
        let values = vec![TypedValue::new(1, 7i64), TypedValue::new(2, 8)];
        let mut block = encode_block_with(&values, TimestampEncoding::Raw, ValueEncoding::Raw);
        // Count is the single-byte varint right after the scheme byte.
        block[2] = 3;
        assert_corrupt(&block);
    }

    #[test]
    fn absurd_count_is_rejected_before_allocating() {
        let mut block = vec![BlockType::Integer as u8, 0x20];
        crate::encoding::put_uvarint(&mut block, u64::MAX);
        crate::encoding::put_uvarint(&mut block, 2);
        block.extend_from_slice(&[0, 0]);
        assert_corrupt(&block);
    }

    #[test]
    fn invalid_raw_boolean_byte() {
        let values = vec![TypedValue::new(1, true)];
        let mut block = encode_block_with(&values, TimestampEncoding::Raw, ValueEncoding::Raw);
        let last = block.len() - 1;
        block[last] = 2;
        assert_corrupt(&block);
    }

    #[test]
    fn string_prefix_longer_than_predecessor() {
        let values = vec![TypedValue::new(1, b"a".to_vec())];
        let mut block = encode_block_with(&values, TimestampEncoding::Raw, ValueEncoding::Packed);
        // Values section of a single packed string: [shared][len][bytes].
        let shared_at = block.len() - 3;
        block[shared_at] = 1;
        assert_corrupt(&block);
    }

    #[test]
    fn decoding_as_the_wrong_type_is_a_mismatch() {
        let block = float_block();
        let mut ints = Vec::new();
        match decode_block::<i64>(&block, &mut ints) {
            Err(CodecError::TypeMismatch { expected, found }) => {
                assert_eq!(expected, BlockType::Integer);
                assert_eq!(found, BlockType::Float);
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
        let mut array = StringArray::new();
        assert!(matches!(
            decode_array_block(&block, &mut array),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn input_is_not_mutated() {
        let block = float_block();
        let copy = block.clone();
        let mut out = Vec::new();
        decode_values(&block, &mut out).unwrap();
        assert_eq!(block, copy);
    }
}
