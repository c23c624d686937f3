//! Message reassembly.
//!
//! A message is the concatenated payload of consecutive packets of one type,
//! closed by the first packet carrying END_OF_MESSAGE.

use bytes::{Bytes, BytesMut};
use tdslink_protocol::PacketType;

use crate::error::CodecError;
use crate::packet_codec::Packet;

/// A complete message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Packet type shared by every packet of the message.
    pub packet_type: PacketType,
    /// Concatenated payload.
    pub payload: Bytes,
    /// Number of packets the message arrived in.
    pub packet_count: usize,
}

impl Message {
    /// Payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Accumulates packets until a message is complete.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
    packet_count: usize,
}

impl MessageAssembler {
    /// Empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a packet; returns the message once its last packet arrives.
    pub fn push(&mut self, packet: Packet) -> Result<Option<Message>, CodecError> {
        let actual = packet.header.packet_type;
        let packet_type = *self.packet_type.get_or_insert(actual);
        if packet_type != actual {
            return Err(CodecError::MixedPacketTypes {
                expected: packet_type,
                actual,
            });
        }

        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        tracing::trace!(
            packet_type = ?actual,
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            is_eom = packet.is_end_of_message(),
            "assembling message"
        );

        if !packet.is_end_of_message() {
            return Ok(None);
        }

        let message = Message {
            packet_type,
            payload: self.buffer.split().freeze(),
            packet_count: self.packet_count,
        };
        self.packet_type = None;
        self.packet_count = 0;
        Ok(Some(message))
    }

    /// Whether a message is partially assembled.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }
}
