//! Mock server errors.

use tdslink_codec::CodecError;
use tdslink_protocol::ProtocolError;
use tdslink_types::TypeError;
use thiserror::Error;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The client broke the protocol, or a response could not be built.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A message failed to decode.
    #[error("Decode error: {0}")]
    Decode(#[from] ProtocolError),

    /// Framing error.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A row value did not fit its column.
    #[error("Value error: {0}")]
    Value(#[from] TypeError),

    /// Certificate generation or TLS setup failed.
    #[error("TLS setup error: {0}")]
    Tls(String),
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;
