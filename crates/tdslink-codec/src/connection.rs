//! Async connection over a framed transport.
//!
//! The protocol is strictly half-duplex: a caller sends one request message
//! and then reads response messages until the final DONE. The only point
//! where a caller waits on the peer is [`Connection::read_message`], which
//! returns once every packet up to END_OF_MESSAGE has arrived.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tdslink_protocol::{PacketType, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::CodecError;
use crate::framer::{FIRST_PACKET_ID, PacketFramer};
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::TdsCodec;

/// A TDS connection over any byte stream.
pub struct Connection<T> {
    framed: Framed<T, TdsCodec>,
    assembler: MessageAssembler,
    framer: PacketFramer,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a transport using the default packet size.
    ///
    /// Until a size is negotiated, received packets are accepted up to the
    /// protocol maximum.
    pub fn new(transport: T) -> Self {
        Self {
            framed: Framed::new(transport, TdsCodec::new()),
            assembler: MessageAssembler::new(),
            framer: PacketFramer::default(),
        }
    }

    /// Wrap a transport with a specific packet size.
    pub fn with_packet_size(transport: T, packet_size: usize) -> Result<Self, CodecError> {
        let mut conn = Self::new(transport);
        conn.set_packet_size(packet_size)?;
        Ok(conn)
    }

    /// Current packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.framer.packet_size()
    }

    /// Switch to a new packet size.
    ///
    /// Applies to the next message sent and bounds every packet received
    /// from here on.
    pub fn set_packet_size(&mut self, packet_size: usize) -> Result<(), CodecError> {
        self.framer = PacketFramer::new(packet_size)?;
        self.framed.codec_mut().set_max_packet_size(packet_size);
        tracing::debug!(packet_size, "packet size changed");
        Ok(())
    }

    /// Send a complete message, split into as many packets as needed and
    /// flushed before returning.
    pub async fn send_message(&mut self, packet_type: PacketType, payload: Bytes) -> Result<(), CodecError> {
        let packets = self.framer.encode(packet_type, &payload, FIRST_PACKET_ID);
        tracing::debug!(
            packet_type = ?packet_type,
            payload_len = payload.len(),
            packets = packets.len(),
            "sending message"
        );
        for packet in packets {
            self.framed.feed(packet).await?;
        }
        self.framed.flush().await
    }

    /// Wait for the next complete message.
    ///
    /// A stream that ends between messages yields
    /// [`CodecError::ConnectionClosed`]; one that ends inside a message
    /// yields [`CodecError::IncompleteMessage`].
    pub async fn read_message(&mut self) -> Result<Message, CodecError> {
        loop {
            match self.framed.next().await {
                Some(Ok(packet)) => {
                    if let Some(message) = self.assembler.push(packet)? {
                        tracing::trace!(
                            packet_type = ?message.packet_type,
                            len = message.len(),
                            packets = message.packet_count,
                            "received message"
                        );
                        return Ok(message);
                    }
                }
                Some(Err(e)) => return Err(e),
                None if self.assembler.has_partial() => return Err(CodecError::IncompleteMessage),
                None => return Err(CodecError::ConnectionClosed),
            }
        }
    }

    /// Shared access to the transport.
    pub fn get_ref(&self) -> &T {
        self.framed.get_ref()
    }

    /// Exclusive access to the transport.
    pub fn get_mut(&mut self) -> &mut T {
        self.framed.get_mut()
    }

    /// Take the transport back, e.g. to layer TLS on it.
    ///
    /// Fails if response bytes are buffered: handing those over would lose
    /// them, which only happens if the peer sent data out of turn.
    pub fn into_inner(self) -> Result<T, CodecError> {
        if self.assembler.has_partial() {
            return Err(CodecError::IncompleteMessage);
        }
        let parts = self.framed.into_parts();
        if !parts.read_buf.is_empty() {
            return Err(ProtocolError::InvalidField {
                field: "transport",
                reason: format!("{} unread bytes at transport switch", parts.read_buf.len()),
            }
            .into());
        }
        Ok(parts.io)
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("packet_size", &self.framer.packet_size())
            .field("has_partial_message", &self.assembler.has_partial())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_send_splits_by_packet_size() {
        let framer = PacketFramer::new(16).unwrap();
        let expected = framer.encode_to_bytes(PacketType::SqlBatch, b"0123456789abcdef", 1);

        let mock = Builder::new().write(&expected).build();
        let mut conn = Connection::with_packet_size(mock, 16).unwrap();
        conn.send_message(PacketType::SqlBatch, Bytes::from_static(b"0123456789abcdef"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_reassembles_across_reads() {
        let framer = PacketFramer::new(12).unwrap();
        let wire = framer.encode_to_bytes(PacketType::TabularResult, b"hello world", 1);
        let (a, b) = wire.split_at(5);

        let mock = Builder::new().read(a).read(b).build();
        let mut conn = Connection::new(mock);
        let message = conn.read_message().await.unwrap();
        assert_eq!(&message.payload[..], b"hello world");
        assert_eq!(message.packet_count, 3);
    }

    #[tokio::test]
    async fn test_stream_ending_mid_packet() {
        let framer = PacketFramer::new(64).unwrap();
        let wire = framer.encode_to_bytes(PacketType::TabularResult, b"truncated", 1);

        let mock = Builder::new().read(&wire[..wire.len() - 3]).build();
        let mut conn = Connection::new(mock);
        assert!(matches!(
            conn.read_message().await,
            Err(CodecError::TruncatedFrame { declared: 17, available: 14 })
        ));
    }

    #[tokio::test]
    async fn test_negotiated_size_bounds_received_packets() {
        let framer = PacketFramer::new(3008).unwrap();
        let wire = framer.encode_to_bytes(PacketType::TabularResult, &[0u8; 3000], 1);

        let mock = Builder::new().read(&wire).build();
        let mut conn = Connection::with_packet_size(mock, 512).unwrap();
        assert!(matches!(
            conn.read_message().await,
            Err(CodecError::PacketTooLarge { size: 3008, max: 512 })
        ));
    }

    #[tokio::test]
    async fn test_packet_size_raised_after_negotiation() {
        let framer = PacketFramer::new(8192).unwrap();
        let wire = framer.encode_to_bytes(PacketType::TabularResult, &[7u8; 6000], 1);

        let mock = Builder::new().read(&wire).build();
        let mut conn = Connection::with_packet_size(mock, 4096).unwrap();
        conn.set_packet_size(8192).unwrap();
        let message = conn.read_message().await.unwrap();
        assert_eq!(message.len(), 6000);
        assert_eq!(message.packet_count, 1);
    }

    #[tokio::test]
    async fn test_clean_close() {
        let mock = Builder::new().build();
        let mut conn = Connection::new(mock);
        assert!(matches!(conn.read_message().await, Err(CodecError::ConnectionClosed)));
    }
}
