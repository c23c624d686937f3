//! Single-packet codec for tokio-util framing.

use bytes::{BufMut, BytesMut};
use tdslink_protocol::{PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// One TDS packet: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet header. `length` is rewritten on encode.
    pub header: PacketHeader,
    /// Payload without the header.
    pub payload: BytesMut,
}

impl Packet {
    /// Create a packet.
    #[must_use]
    pub fn new(header: PacketHeader, payload: BytesMut) -> Self {
        Self { header, payload }
    }

    /// Size on the wire.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Whether this packet ends its message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// Packet codec.
///
/// The decoder waits for a whole packet before yielding it. If the stream
/// ends while a packet is still incomplete, `decode_eof` reports the
/// truncation instead of silently dropping the tail.
#[derive(Debug, Clone)]
pub struct TdsCodec {
    max_packet_size: usize,
}

impl TdsCodec {
    /// Codec accepting packets up to the protocol maximum.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: u16::MAX as usize,
        }
    }

    /// Limit accepted packets to `size` bytes.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(u16::MAX as usize);
        self
    }

    /// Change the accepted maximum after a packet-size renegotiation.
    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size.min(u16::MAX as usize);
    }

    /// Current accepted maximum.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        let length = u16::from_be_bytes([src[2], src[3]]) as usize;
        if length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut header_bytes = &src[..PACKET_HEADER_SIZE];
        let header = PacketHeader::decode(&mut header_bytes)?;
        let mut packet = src.split_to(length);
        let payload = packet.split_off(PACKET_HEADER_SIZE);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            packet_id = header.packet_id,
            is_eom = header.is_end_of_message(),
            "decoded TDS packet"
        );

        Ok(Some(Packet::new(header, payload)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(packet) => Ok(Some(packet)),
            None if buf.is_empty() => Ok(None),
            None => {
                let declared = if buf.len() >= 4 {
                    u16::from_be_bytes([buf[2], buf[3]]) as usize
                } else {
                    PACKET_HEADER_SIZE
                };
                Err(CodecError::TruncatedFrame {
                    declared,
                    available: buf.len(),
                })
            }
        }
    }
}

impl Encoder<Packet> for TdsCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total_length = item.total_size();
        if total_length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: total_length,
                max: self.max_packet_size,
            });
        }

        dst.reserve(total_length);
        let mut header = item.header;
        header.length = total_length as u16;
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = total_length,
            packet_id = header.packet_id,
            "encoded TDS packet"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tdslink_protocol::{PacketStatus, PacketType};

    fn raw_packet(payload: &[u8], declared: u16) -> BytesMut {
        let mut data = BytesMut::new();
        data.put_u8(PacketType::TabularResult as u8);
        data.put_u8(PacketStatus::END_OF_MESSAGE.bits());
        data.put_u16(declared);
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);
        data.put_slice(payload);
        data
    }

    #[test]
    fn test_decode_complete_packet() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(b"test", 12);
        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.header.packet_type, PacketType::TabularResult);
        assert_eq!(&packet.payload[..], b"test");
        assert!(data.is_empty());
    }

    #[test]
    fn test_decode_waits_for_rest_of_packet() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(b"te", 12);
        assert!(codec.decode(&mut data).unwrap().is_none());
        assert_eq!(data.len(), 10);
    }

    #[test]
    fn test_decode_eof_reports_truncation() {
        let mut codec = TdsCodec::new();
        let mut data = raw_packet(b"te", 12);
        assert!(matches!(
            codec.decode_eof(&mut data),
            Err(CodecError::TruncatedFrame { declared: 12, available: 10 })
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_packet() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);
        let mut data = raw_packet(&[], 4096);
        assert!(matches!(
            codec.decode(&mut data),
            Err(CodecError::PacketTooLarge { size: 4096, max: 512 })
        ));
    }

    #[test]
    fn test_encode_rewrites_length() {
        let mut codec = TdsCodec::new();
        let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 0)
            .with_packet_id(3);
        let mut dst = BytesMut::new();
        codec
            .encode(Packet::new(header, BytesMut::from(&b"test"[..])), &mut dst)
            .unwrap();
        assert_eq!(&dst[..8], &[0x01, 0x01, 0x00, 0x0C, 0x00, 0x00, 0x03, 0x00]);
    }
}
