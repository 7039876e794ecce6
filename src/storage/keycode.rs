//! Order-preserving key encoding
//!
//! Keys written to a storage engine are compared bytewise, so every component is
//! encoded such that the byte order matches the logical order:
//! - integers are big-endian, signed ones with the sign bit flipped
//! - byte strings escape `0x00` as `0x00 0xff` and end with `0x00 0x00`, which
//!   keeps `"ab"` sorted before `"abc"` and makes an encoded string a valid
//!   prefix for every key that starts with it

use std::ops::Bound;

use crate::error::{Error, ErrorCode, Result};

pub fn encode_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        match b {
            0x00 => out.extend([0x00, 0xff]),
            b => out.push(b),
        }
    }
    out.extend([0x00, 0x00]);
}

pub fn decode_bytes(input: &mut &[u8]) -> Result<Vec<u8>> {
    let data: &[u8] = *input;
    let mut decoded = Vec::new();
    let mut iter = data.iter().copied().enumerate();
    let taken = loop {
        match iter.next() {
            Some((_, 0x00)) => match iter.next() {
                Some((i, 0x00)) => break i + 1,
                Some((_, 0xff)) => decoded.push(0x00),
                _ => return Err(corrupt("invalid escape sequence")),
            },
            Some((_, b)) => decoded.push(b),
            None => return Err(corrupt("unterminated byte string")),
        }
    };
    *input = &data[taken..];
    Ok(decoded)
}

pub fn encode_u64(out: &mut Vec<u8>, v: u64) {
    out.extend(v.to_be_bytes());
}

pub fn decode_u64(input: &mut &[u8]) -> Result<u64> {
    if input.len() < 8 {
        return Err(corrupt("truncated u64"));
    }
    let data: &[u8] = *input;
    let (head, rest) = data.split_at(8);
    *input = rest;
    Ok(u64::from_be_bytes(head.try_into()?))
}

pub fn encode_i64(out: &mut Vec<u8>, v: i64) {
    encode_u64(out, (v as u64) ^ (1 << 63));
}

/// Floats are mapped onto u64 so that negative values sort below positive ones
pub fn encode_f64(out: &mut Vec<u8>, v: f64) {
    let bits = v.to_bits();
    let bits = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
    encode_u64(out, bits);
}

/// Returns the exclusive upper bound of all keys starting with `prefix`
pub fn prefix_end(prefix: &[u8]) -> Bound<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return Bound::Excluded(end);
        }
    }
    Bound::Unbounded
}

fn corrupt(msg: &str) -> Error {
    Error::engine(ErrorCode::Corrupt, format!("keycode: {}", msg))
}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use super::*;

    fn bytes(b: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_bytes(&mut out, b);
        out
    }

    #[test]
    fn test_bytes() -> Result<()> {
        assert_eq!(bytes(b"ab"), vec![b'a', b'b', 0x00, 0x00]);
        assert_eq!(bytes(&[0x01, 0x00, 0x02]), vec![0x01, 0x00, 0xff, 0x02, 0x00, 0x00]);

        let mut encoded = bytes(&[0x00, 0xff, 0x00]);
        encoded.extend([7, 8]);
        let mut input = encoded.as_slice();
        assert_eq!(decode_bytes(&mut input)?, vec![0x00, 0xff, 0x00]);
        assert_eq!(input, &[7, 8]);

        let mut truncated: &[u8] = &[b'a', 0x00];
        assert!(decode_bytes(&mut truncated).is_err());
        Ok(())
    }

    #[test]
    fn test_ordering() {
        assert!(bytes(b"ab") < bytes(b"abc"));
        assert!(bytes(b"ab\x00") > bytes(b"ab"));
        assert!(bytes(b"b") > bytes(b"abc"));

        let ints = [i64::MIN, -10, -1, 0, 1, 42, i64::MAX];
        let encoded: Vec<Vec<u8>> = ints
            .iter()
            .map(|i| {
                let mut out = Vec::new();
                encode_i64(&mut out, *i);
                out
            })
            .collect();
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));

        let floats = [f64::NEG_INFINITY, -2.5, -0.5, 0.0, 0.5, 3.0, f64::INFINITY];
        let encoded: Vec<Vec<u8>> = floats
            .iter()
            .map(|f| {
                let mut out = Vec::new();
                encode_f64(&mut out, *f);
                out
            })
            .collect();
        assert!(encoded.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_prefix_end() {
        assert_eq!(prefix_end(b"ab"), Bound::Excluded(b"ac".to_vec()));
        assert_eq!(prefix_end(&[0x01, 0xff]), Bound::Excluded(vec![0x02]));
        assert_eq!(prefix_end(&[0xff, 0xff]), Bound::Unbounded);
        assert_eq!(prefix_end(&[]), Bound::Unbounded);
    }
}
