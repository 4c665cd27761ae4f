//! Position-based binary encoding primitives.
//!
//! Every encoder writes into a caller-owned buffer at `*pos` and advances
//! `pos` only on success. Decoders read from `buf[*pos..]` and likewise leave
//! `pos` untouched when they fail.
//!
//! Variable-length integers use LEB128 over the two's-complement `u64` bit
//! pattern, so negative values always take ten bytes.

use crate::error::{Result, StrataError};

/// Maximum encoded length of a varint.
pub const MAX_VARINT_LEN: usize = 10;

#[inline]
fn check_space(buf: &[u8], pos: usize, needed: usize) -> Result<()> {
    let available = buf.len().saturating_sub(pos);
    if needed > available {
        return Err(StrataError::BufferTooSmall { needed, available });
    }
    Ok(())
}

#[inline]
fn truncated(what: &str) -> StrataError {
    StrataError::CorruptData(format!("truncated {}", what))
}

/// Returns the number of bytes `encode_vi64` writes for `value`.
pub fn encoded_length_vi64(value: i64) -> usize {
    let mut v = value as u64;
    let mut len = 1;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

/// Encodes `value` as a varint.
pub fn encode_vi64(buf: &mut [u8], pos: &mut usize, value: i64) -> Result<()> {
    check_space(buf, *pos, encoded_length_vi64(value))?;
    let mut v = value as u64;
    let mut p = *pos;
    while v >= 0x80 {
        buf[p] = (v as u8) | 0x80;
        v >>= 7;
        p += 1;
    }
    buf[p] = v as u8;
    *pos = p + 1;
    Ok(())
}

/// Decodes a varint.
pub fn decode_vi64(buf: &[u8], pos: &mut usize) -> Result<i64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    let mut p = *pos;
    loop {
        let byte = *buf.get(p).ok_or_else(|| truncated("varint"))?;
        p += 1;
        if shift == 63 && (byte & 0x7f) > 1 {
            return Err(StrataError::CorruptData("varint overflows 64 bits".to_string()));
        }
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(StrataError::CorruptData("varint too long".to_string()));
        }
    }
    *pos = p;
    Ok(result as i64)
}

/// Encodes a single byte.
pub fn encode_i8(buf: &mut [u8], pos: &mut usize, value: u8) -> Result<()> {
    check_space(buf, *pos, 1)?;
    buf[*pos] = value;
    *pos += 1;
    Ok(())
}

/// Decodes a single byte.
pub fn decode_i8(buf: &[u8], pos: &mut usize) -> Result<u8> {
    let byte = *buf.get(*pos).ok_or_else(|| truncated("byte"))?;
    *pos += 1;
    Ok(byte)
}

/// Copies `data` verbatim.
pub fn encode_raw(buf: &mut [u8], pos: &mut usize, data: &[u8]) -> Result<()> {
    check_space(buf, *pos, data.len())?;
    buf[*pos..*pos + data.len()].copy_from_slice(data);
    *pos += data.len();
    Ok(())
}

/// Borrows `len` bytes verbatim.
pub fn decode_raw<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| truncated("raw bytes"))?;
    let data = &buf[*pos..end];
    *pos = end;
    Ok(data)
}

/// Encodes a length-prefixed byte string.
pub fn encode_vstr(buf: &mut [u8], pos: &mut usize, data: &[u8]) -> Result<()> {
    let needed = encoded_length_vstr(data.len());
    check_space(buf, *pos, needed)?;
    encode_vi64(buf, pos, data.len() as i64)?;
    encode_raw(buf, pos, data)
}

/// Returns the encoded length of a byte string of `len` bytes.
pub fn encoded_length_vstr(len: usize) -> usize {
    encoded_length_vi64(len as i64) + len
}

/// Decodes a length-prefixed byte string.
pub fn decode_vstr<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let mut p = *pos;
    let len = decode_vi64(buf, &mut p)?;
    if len < 0 {
        return Err(StrataError::CorruptData(format!(
            "negative string length: {}",
            len
        )));
    }
    let data = decode_raw(buf, &mut p, len as usize)?;
    *pos = p;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_lengths() {
        assert_eq!(encoded_length_vi64(0), 1);
        assert_eq!(encoded_length_vi64(127), 1);
        assert_eq!(encoded_length_vi64(128), 2);
        assert_eq!(encoded_length_vi64(16383), 2);
        assert_eq!(encoded_length_vi64(16384), 3);
        assert_eq!(encoded_length_vi64(i64::MAX), 9);
        assert_eq!(encoded_length_vi64(-1), MAX_VARINT_LEN);
    }

    #[test]
    fn test_varint_values() {
        let mut buf = [0u8; 64];
        let values = [0i64, 1, 300, -1, i64::MIN, i64::MAX, 1 << 40];
        let mut pos = 0;
        for v in values {
            encode_vi64(&mut buf, &mut pos, v).unwrap();
        }
        let mut read = 0;
        for v in values {
            assert_eq!(decode_vi64(&buf, &mut read).unwrap(), v);
        }
        assert_eq!(read, pos);
    }

    #[test]
    fn test_varint_300_layout() {
        let mut buf = [0u8; 4];
        let mut pos = 0;
        encode_vi64(&mut buf, &mut pos, 300).unwrap();
        assert_eq!(&buf[..pos], &[0xac, 0x02]);
    }

    #[test]
    fn test_encode_buffer_too_small() {
        let mut buf = [0u8; 1];
        let mut pos = 0;
        let err = encode_vi64(&mut buf, &mut pos, 300).unwrap_err();
        assert!(matches!(
            err,
            StrataError::BufferTooSmall {
                needed: 2,
                available: 1
            }
        ));
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_decode_truncated_varint() {
        let buf = [0x80u8, 0x80];
        let mut pos = 0;
        assert!(matches!(
            decode_vi64(&buf, &mut pos),
            Err(StrataError::CorruptData(_))
        ));
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_decode_overlong_varint() {
        let buf = [0xffu8; 11];
        let mut pos = 0;
        assert!(decode_vi64(&buf, &mut pos).is_err());
        assert_eq!(pos, 0);
    }

    #[test]
    fn test_vstr() {
        let mut buf = [0u8; 16];
        let mut pos = 0;
        encode_vstr(&mut buf, &mut pos, b"strata").unwrap();
        assert_eq!(pos, encoded_length_vstr(6));

        let mut read = 0;
        assert_eq!(decode_vstr(&buf, &mut read).unwrap(), b"strata");
        assert_eq!(read, pos);
    }

    #[test]
    fn test_vstr_truncated() {
        let mut buf = [0u8; 16];
        let mut pos = 0;
        encode_vstr(&mut buf, &mut pos, b"strata").unwrap();

        let mut read = 0;
        assert!(decode_vstr(&buf[..pos - 1], &mut read).is_err());
        assert_eq!(read, 0);
    }

    #[test]
    fn test_single_byte() {
        let mut buf = [0u8; 1];
        let mut pos = 0;
        encode_i8(&mut buf, &mut pos, 0xab).unwrap();
        assert!(encode_i8(&mut buf, &mut pos, 0xcd).is_err());

        let mut read = 0;
        assert_eq!(decode_i8(&buf, &mut read).unwrap(), 0xab);
        assert!(decode_i8(&buf, &mut read).is_err());
    }
}
