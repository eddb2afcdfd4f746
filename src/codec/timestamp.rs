use crate::encoding::{get_varint, put_varint};

use super::{CodecError, TimestampEncoding, corrupt};

/// Pick run-length when every interval is identical, delta otherwise.
pub(super) fn choose(timestamps: &[i64]) -> TimestampEncoding {
    if timestamps.len() < 2 {
        return TimestampEncoding::Delta;
    }
    let interval = timestamps[1].wrapping_sub(timestamps[0]);
    if timestamps
        .windows(2)
        .all(|w| w[1].wrapping_sub(w[0]) == interval)
    {
        TimestampEncoding::RunLength
    } else {
        TimestampEncoding::Delta
    }
}

pub(super) fn encode(timestamps: &[i64], encoding: TimestampEncoding, buf: &mut Vec<u8>) {
    match encoding {
        TimestampEncoding::Raw => {
            for ts in timestamps {
                buf.extend_from_slice(&ts.to_le_bytes());
            }
        }
        TimestampEncoding::Delta => {
            let mut prev = 0i64;
            for &ts in timestamps {
                put_varint(buf, ts.wrapping_sub(prev));
                prev = ts;
            }
        }
        TimestampEncoding::RunLength => {
            let first = timestamps.first().copied().unwrap_or(0);
            let interval = match timestamps {
                [a, b, ..] => b.wrapping_sub(*a),
                _ => 0,
            };
            put_varint(buf, first);
            put_varint(buf, interval);
        }
    }
}

pub(super) fn decode(
    buf: &[u8],
    encoding: TimestampEncoding,
    count: usize,
    out: &mut Vec<i64>,
) -> Result<(), CodecError> {
    match encoding {
        TimestampEncoding::Raw => {
            if Some(buf.len()) != count.checked_mul(8) {
                return Err(corrupt(format!(
                    "raw timestamps: {} bytes for {count} values",
                    buf.len()
                )));
            }
            out.reserve(count);
            for chunk in buf.chunks_exact(8) {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(chunk);
                out.push(i64::from_le_bytes(arr));
            }
        }
        TimestampEncoding::Delta => {
            if count > buf.len() {
                return Err(corrupt(format!(
                    "delta timestamps: {} bytes cannot hold {count} values",
                    buf.len()
                )));
            }
            out.reserve(count);
            let mut pos = 0;
            let mut prev = 0i64;
            for _ in 0..count {
                let (delta, n) = get_varint(&buf[pos..])?;
                pos += n;
                prev = prev.wrapping_add(delta);
                out.push(prev);
            }
            if pos != buf.len() {
                return Err(corrupt(format!(
                    "delta timestamps: {} trailing bytes",
                    buf.len() - pos
                )));
            }
        }
        TimestampEncoding::RunLength => {
            let (first, n) = get_varint(buf)?;
            let (interval, m) = get_varint(&buf[n..])?;
            if n + m != buf.len() {
                return Err(corrupt("run-length timestamps: trailing bytes"));
            }
            out.reserve(count);
            let mut ts = first;
            for _ in 0..count {
                out.push(ts);
                ts = ts.wrapping_add(interval);
            }
        }
    }
    Ok(())
}
