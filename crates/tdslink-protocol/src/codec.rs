//! Low-level readers and writers shared by the message encoders.
//!
//! TDS carries almost all text as UTF-16LE with either a one-byte or a
//! two-byte character-count prefix.

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Ensure `src` holds at least `n` more bytes.
#[inline]
pub fn ensure_remaining(src: &impl Buf, n: usize) -> Result<(), ProtocolError> {
    if src.remaining() < n {
        Err(ProtocolError::UnexpectedEof)
    } else {
        Ok(())
    }
}

/// Read a UTF-16LE string with a one-byte character count.
pub fn read_b_varchar(src: &mut impl Buf, field: &'static str) -> Result<String, ProtocolError> {
    ensure_remaining(src, 1)?;
    let len = src.get_u8() as usize;
    read_utf16_string(src, len, field)
}

/// Read a UTF-16LE string with a two-byte little-endian character count.
pub fn read_us_varchar(src: &mut impl Buf, field: &'static str) -> Result<String, ProtocolError> {
    ensure_remaining(src, 2)?;
    let len = src.get_u16_le() as usize;
    read_utf16_string(src, len, field)
}

/// Read `char_count` UTF-16LE code units.
pub fn read_utf16_string(
    src: &mut impl Buf,
    char_count: usize,
    field: &'static str,
) -> Result<String, ProtocolError> {
    ensure_remaining(src, char_count * 2)?;
    let units: Vec<u16> = (0..char_count).map(|_| src.get_u16_le()).collect();
    String::from_utf16(&units).map_err(|_| ProtocolError::StringEncoding(field))
}

/// Decode a whole byte slice as UTF-16LE.
pub fn decode_utf16_le(bytes: &[u8], field: &'static str) -> Result<String, ProtocolError> {
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::StringEncoding(field));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| ProtocolError::StringEncoding(field))
}

/// Write a UTF-16LE string with a one-byte character count, truncating at 255.
pub fn write_b_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(u8::MAX as usize).collect();
    dst.put_u8(units.len() as u8);
    for unit in units {
        dst.put_u16_le(unit);
    }
}

/// Write a UTF-16LE string with a two-byte character count, truncating at 65535.
pub fn write_us_varchar(dst: &mut impl BufMut, s: &str) {
    let units: Vec<u16> = s.encode_utf16().take(u16::MAX as usize).collect();
    dst.put_u16_le(units.len() as u16);
    for unit in units {
        dst.put_u16_le(unit);
    }
}

/// Write a UTF-16LE string without a length prefix.
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}

/// Number of UTF-16 code units in `s`.
#[must_use]
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_b_varchar_roundtrip() {
        let mut buf = BytesMut::new();
        write_b_varchar(&mut buf, "Hello, 世界!");
        assert_eq!(buf[0], 10);

        let mut cursor = buf.freeze();
        assert_eq!(read_b_varchar(&mut cursor, "test").unwrap(), "Hello, 世界!");
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_us_varchar_truncated_input() {
        let mut cursor: &[u8] = &[0x05, 0x00, b'a', 0x00];
        assert_eq!(
            read_us_varchar(&mut cursor, "test"),
            Err(ProtocolError::UnexpectedEof)
        );
    }

    #[test]
    fn test_decode_utf16_rejects_lone_surrogate() {
        assert_eq!(
            decode_utf16_le(&[0x00, 0xD8], "name"),
            Err(ProtocolError::StringEncoding("name"))
        );
        assert_eq!(
            decode_utf16_le(&[0x41], "name"),
            Err(ProtocolError::StringEncoding("name"))
        );
    }

    #[test]
    fn test_utf16_len_counts_surrogate_pairs() {
        assert_eq!(utf16_len("abc"), 3);
        assert_eq!(utf16_len("😀"), 2);
    }
}
