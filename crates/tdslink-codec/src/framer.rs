//! Splitting payloads into packets and joining packets back into messages.
//!
//! This is the synchronous half of the framing layer. [`Connection`] drives it
//! over a socket; tests and servers can use it directly on buffers.
//!
//! [`Connection`]: crate::Connection

use bytes::{Buf, BufMut, BytesMut};
use tdslink_protocol::{DEFAULT_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};

use crate::error::CodecError;
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::Packet;

/// Packet id of the first packet of every message.
pub const FIRST_PACKET_ID: u8 = 1;

/// Frames payloads for one negotiated packet size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketFramer {
    packet_size: usize,
}

impl Default for PacketFramer {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
        }
    }
}

impl PacketFramer {
    /// Framer for `packet_size`-byte packets, header included.
    pub fn new(packet_size: usize) -> Result<Self, CodecError> {
        if packet_size <= PACKET_HEADER_SIZE || packet_size > u16::MAX as usize {
            return Err(CodecError::InvalidPacketSize(packet_size));
        }
        Ok(Self { packet_size })
    }

    /// Negotiated packet size.
    #[must_use]
    pub const fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Largest payload a single packet can carry.
    #[must_use]
    pub const fn max_payload(&self) -> usize {
        self.packet_size - PACKET_HEADER_SIZE
    }

    /// Number of packets needed for a payload of `len` bytes.
    #[must_use]
    pub const fn packet_count(&self, len: usize) -> usize {
        if len == 0 { 1 } else { len.div_ceil(self.max_payload()) }
    }

    /// Split `payload` into packets.
    ///
    /// Every packet but the last has END_OF_MESSAGE clear. Packet ids start
    /// at `first_packet_id` and wrap at 255. An empty payload still produces
    /// one packet.
    #[must_use]
    pub fn encode(&self, packet_type: PacketType, payload: &[u8], first_packet_id: u8) -> Vec<Packet> {
        let count = self.packet_count(payload.len());
        let mut packets = Vec::with_capacity(count);
        let mut packet_id = first_packet_id;

        let mut chunks = payload.chunks(self.max_payload()).peekable();
        if chunks.peek().is_none() {
            let header = PacketHeader::new(packet_type, PacketStatus::END_OF_MESSAGE, PACKET_HEADER_SIZE as u16)
                .with_packet_id(packet_id);
            packets.push(Packet::new(header, BytesMut::new()));
            return packets;
        }

        while let Some(chunk) = chunks.next() {
            let status = if chunks.peek().is_none() {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            let length = (PACKET_HEADER_SIZE + chunk.len()) as u16;
            let header = PacketHeader::new(packet_type, status, length).with_packet_id(packet_id);
            packets.push(Packet::new(header, BytesMut::from(chunk)));
            packet_id = packet_id.wrapping_add(1);
        }
        packets
    }

    /// Split `payload` into packets and serialize them back to back.
    #[must_use]
    pub fn encode_to_bytes(&self, packet_type: PacketType, payload: &[u8], first_packet_id: u8) -> BytesMut {
        let packets = self.encode(packet_type, payload, first_packet_id);
        let mut out = BytesMut::with_capacity(payload.len() + packets.len() * PACKET_HEADER_SIZE);
        for packet in packets {
            packet.header.encode(&mut out);
            out.put_slice(&packet.payload);
        }
        out
    }

    /// Read one message from a buffer holding whole packets.
    ///
    /// Returns `None` when the buffer is empty. A header that declares more
    /// bytes than the buffer holds, or a buffer that ends before the
    /// END_OF_MESSAGE packet, is an error; nothing is recovered.
    pub fn decode(&self, src: &mut impl Buf) -> Result<Option<Message>, CodecError> {
        if !src.has_remaining() {
            return Ok(None);
        }

        let mut assembler = MessageAssembler::new();
        loop {
            if !src.has_remaining() {
                return Err(CodecError::IncompleteMessage);
            }
            if src.remaining() < PACKET_HEADER_SIZE {
                return Err(CodecError::TruncatedFrame {
                    declared: PACKET_HEADER_SIZE,
                    available: src.remaining(),
                });
            }

            let header = PacketHeader::decode(src)?;
            let length = header.length as usize;
            if length > self.packet_size {
                return Err(CodecError::PacketTooLarge {
                    size: length,
                    max: self.packet_size,
                });
            }
            let payload_len = header.payload_length();
            if src.remaining() < payload_len {
                return Err(CodecError::TruncatedFrame {
                    declared: length,
                    available: PACKET_HEADER_SIZE + src.remaining(),
                });
            }

            let payload = BytesMut::from(&src.copy_to_bytes(payload_len)[..]);
            if let Some(message) = assembler.push(Packet::new(header, payload))? {
                return Ok(Some(message));
            }
        }
    }
}
