//! Protocol-level error types.

use thiserror::Error;

/// Errors raised while encoding or decoding TDS wire structures.
///
/// Every variant is fatal to the connection that produced the bytes: once a
/// frame or token cannot be parsed there is no way to resynchronize the
/// stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Packet data is shorter than the header claims.
    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    IncompletePacket {
        /// Expected length.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Packet header declares a length smaller than the header itself.
    #[error("invalid packet length {0}")]
    InvalidPacketLength(u16),

    /// Unknown packet type byte.
    #[error("invalid packet type: 0x{0:02X}")]
    InvalidPacketType(u8),

    /// Unknown bits in the packet status byte.
    #[error("invalid packet status: 0x{0:02X}")]
    InvalidPacketStatus(u8),

    /// Unknown token discriminant in a response stream.
    #[error("invalid token type: 0x{0:02X}")]
    InvalidTokenType(u8),

    /// Unknown or unsupported data type in column metadata.
    #[error("invalid data type: 0x{0:02X}")]
    InvalidDataType(u8),

    /// Unknown PRELOGIN option token.
    #[error("invalid prelogin option: 0x{0:02X}")]
    InvalidPreloginOption(u8),

    /// Input ended in the middle of a structure.
    #[error("unexpected end of data")]
    UnexpectedEof,

    /// A UTF-16 string could not be decoded.
    #[error("invalid UTF-16 string in {0}")]
    StringEncoding(&'static str),

    /// A ROW token was seen before any COLMETADATA.
    #[error("row token without column metadata")]
    MissingColumnMetadata,

    /// A structurally valid field carried a value that makes no sense.
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}
