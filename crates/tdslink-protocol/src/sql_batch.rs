//! SQL batch requests.
//!
//! A batch payload is an optional ALL_HEADERS preamble followed by the SQL
//! text as UTF-16LE. The only header this client sends is the transaction
//! descriptor header.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{decode_utf16_le, ensure_remaining, write_utf16_string};
use crate::error::ProtocolError;

/// Size of the ALL_HEADERS block carrying one transaction descriptor header.
pub const ALL_HEADERS_SIZE: usize = 22;

/// Size of the transaction descriptor header inside ALL_HEADERS.
const TRANSACTION_HEADER_SIZE: u32 = 18;

/// Header type of the transaction descriptor header.
const TRANSACTION_HEADER_TYPE: u16 = 0x0002;

/// ALL_HEADERS preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllHeaders {
    /// Transaction descriptor from the last BEGIN_TRANSACTION ENVCHANGE, 0 in
    /// autocommit mode.
    pub transaction_descriptor: u64,
    /// Outstanding request count, 1 without MARS.
    pub outstanding_requests: u32,
}

impl AllHeaders {
    /// Preamble for the given descriptor.
    #[must_use]
    pub const fn new(transaction_descriptor: u64) -> Self {
        Self {
            transaction_descriptor,
            outstanding_requests: 1,
        }
    }

    /// Encode the 22-byte preamble.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(ALL_HEADERS_SIZE as u32);
        dst.put_u32_le(TRANSACTION_HEADER_SIZE);
        dst.put_u16_le(TRANSACTION_HEADER_TYPE);
        dst.put_u64_le(self.transaction_descriptor);
        dst.put_u32_le(self.outstanding_requests);
    }

    /// Decode an ALL_HEADERS block, keeping the transaction descriptor header.
    ///
    /// Headers of other types are skipped.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure_remaining(src, 4)?;
        let total = src.get_u32_le() as usize;
        if total < 4 {
            return Err(ProtocolError::InvalidField {
                field: "all headers length",
                reason: format!("{total} is smaller than the length field"),
            });
        }
        ensure_remaining(src, total - 4)?;
        let mut block = src.copy_to_bytes(total - 4);

        let mut headers = Self::new(0);
        while block.has_remaining() {
            ensure_remaining(&block, 6)?;
            let header_len = block.get_u32_le() as usize;
            let header_type = block.get_u16_le();
            let body_len = header_len.checked_sub(6).ok_or_else(|| ProtocolError::InvalidField {
                field: "header length",
                reason: format!("{header_len} is too short"),
            })?;
            ensure_remaining(&block, body_len)?;
            let mut body = block.copy_to_bytes(body_len);
            if header_type == TRANSACTION_HEADER_TYPE && body_len >= 12 {
                headers.transaction_descriptor = body.get_u64_le();
                headers.outstanding_requests = body.get_u32_le();
            }
        }
        Ok(headers)
    }
}

/// Encode a SQL batch payload.
///
/// With `Some(descriptor)` the ALL_HEADERS preamble is prepended; 0 is the
/// autocommit descriptor. With `None` the payload is the bare SQL text.
#[must_use]
pub fn encode_sql_batch(sql: &str, transaction_descriptor: Option<u64>) -> Bytes {
    let mut buf = BytesMut::with_capacity(ALL_HEADERS_SIZE + sql.len() * 2);
    if let Some(descriptor) = transaction_descriptor {
        AllHeaders::new(descriptor).encode(&mut buf);
    }
    write_utf16_string(&mut buf, sql);
    buf.freeze()
}

/// A decoded SQL batch, as a server sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBatch {
    /// ALL_HEADERS preamble, if the client sent one.
    pub headers: Option<AllHeaders>,
    /// SQL text.
    pub sql: String,
}

impl SqlBatch {
    /// Decode a SQL batch payload.
    ///
    /// The preamble is recognized by its leading length field matching the
    /// header size; SQL text never starts that way because its first code
    /// unit would have to be `0x0016` followed by a NUL.
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut src = payload;
        let headers = if payload.len() >= ALL_HEADERS_SIZE
            && payload[..4] == (ALL_HEADERS_SIZE as u32).to_le_bytes()
        {
            Some(AllHeaders::decode(&mut src)?)
        } else {
            None
        };
        Ok(Self {
            headers,
            sql: decode_utf16_le(src, "sql text")?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_all_headers_layout() {
        let payload = encode_sql_batch("", Some(0x1122_3344_5566_7788));
        assert_eq!(payload.len(), ALL_HEADERS_SIZE);
        assert_eq!(&payload[0..4], &22u32.to_le_bytes());
        assert_eq!(&payload[4..8], &18u32.to_le_bytes());
        assert_eq!(&payload[8..10], &[0x02, 0x00]);
        assert_eq!(&payload[10..18], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&payload[18..22], &1u32.to_le_bytes());
    }

    #[test]
    fn test_autocommit_descriptor_is_zero() {
        let payload = encode_sql_batch("SELECT 1", Some(0));
        assert_eq!(&payload[10..18], &[0u8; 8]);
        assert_eq!(payload.len(), ALL_HEADERS_SIZE + 16);
    }

    #[test]
    fn test_headers_omitted_without_context() {
        let payload = encode_sql_batch("SELECT 1", None);
        assert_eq!(&payload[..], b"S\0E\0L\0E\0C\0T\0 \x001\0");
    }

    #[test]
    fn test_decode_batch_with_headers() {
        let batch = SqlBatch::decode(&encode_sql_batch("COMMIT", Some(42))).unwrap();
        assert_eq!(batch.headers, Some(AllHeaders::new(42)));
        assert_eq!(batch.sql, "COMMIT");
    }

    #[test]
    fn test_decode_batch_without_headers() {
        let batch = SqlBatch::decode(&encode_sql_batch("SELECT @@VERSION", None)).unwrap();
        assert_eq!(batch.headers, None);
        assert_eq!(batch.sql, "SELECT @@VERSION");
    }
}
