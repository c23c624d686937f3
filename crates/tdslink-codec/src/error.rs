//! Codec error types.

use std::io;

use tdslink_protocol::{PacketType, ProtocolError};
use thiserror::Error;

/// Errors raised while framing or transporting TDS messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A header or payload could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The underlying transport failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A frame declares more bytes than the stream delivered.
    #[error("truncated frame: header declares {declared} bytes, {available} available")]
    TruncatedFrame {
        /// Length from the header.
        declared: usize,
        /// Bytes actually present.
        available: usize,
    },

    /// The stream ended between two frames of one message.
    #[error("message ended without an end-of-message frame")]
    IncompleteMessage,

    /// A frame exceeds the negotiated packet size.
    #[error("packet too large: {size} bytes exceeds maximum {max}")]
    PacketTooLarge {
        /// Declared size.
        size: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// A packet size that cannot hold a header plus one payload byte.
    #[error("invalid packet size {0}")]
    InvalidPacketSize(usize),

    /// Frames of one message disagree on the packet type.
    #[error("mixed packet types in one message: started as {expected:?}, got {actual:?}")]
    MixedPacketTypes {
        /// Type of the first frame.
        expected: PacketType,
        /// Type of the offending frame.
        actual: PacketType,
    },

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,
}
