//! Client error types.

use tdslink_codec::CodecError;
use tdslink_protocol::{Done, ProtocolError, ServerMessage};
use tdslink_tls::TlsError;
use tdslink_types::TypeError;
use thiserror::Error;

use crate::filter::FilterConfigError;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The transport could not be opened or the server refused the
    /// negotiated settings.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Malformed frame or token. The connection is unusable afterwards.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server rejected the login.
    #[error("authentication failed: error {number}: {message}")]
    Authentication {
        /// Server error number.
        number: i32,
        /// Server error text.
        message: String,
    },

    /// Server returned an error for a batch.
    #[error("server error {number}: {message}")]
    Server {
        /// Error number.
        number: i32,
        /// Error class/severity (0-25).
        class: u8,
        /// Error state.
        state: u8,
        /// Error message.
        message: String,
        /// Server name where the error occurred.
        server: Option<String>,
        /// Stored procedure name, if any.
        procedure: Option<String>,
        /// Line number in the batch or procedure.
        line: i32,
        /// DONE token that terminated the failing statement, if the server
        /// sent one.
        done: Option<Done>,
        /// Row counts reported by every DONE token of the response.
        rows_affected: u64,
    },

    /// A catalog filter pattern did not compile.
    #[error(transparent)]
    FilterConfig(#[from] FilterConfigError),

    /// Connecting, the TLS handshake or the login did not finish in time.
    #[error("connection timed out")]
    ConnectTimeout,

    /// A response did not arrive in time. The session is poisoned.
    #[error("command timed out")]
    CommandTimeout,

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Type conversion error.
    #[error("type error: {0}")]
    Type(#[from] TypeError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// An earlier fatal error left the session unusable.
    #[error("session is unusable after a previous fatal error")]
    SessionPoisoned,
}

impl Error {
    /// Build a [`Error::Server`] from an ERROR token.
    #[must_use]
    pub fn from_server_message(msg: &ServerMessage) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self::Server {
            number: msg.number,
            class: msg.class,
            state: msg.state,
            message: msg.message.clone(),
            server: non_empty(&msg.server),
            procedure: non_empty(&msg.procedure),
            line: msg.line,
            done: None,
            rows_affected: 0,
        }
    }

    /// Attach the completion of the response a server error came from.
    pub(crate) fn with_completion(mut self, terminator: Option<Done>, total: u64) -> Self {
        if let Self::Server {
            done, rows_affected, ..
        } = &mut self
        {
            *done = terminator;
            *rows_affected = total;
        }
        self
    }

    /// Whether the session that produced this error must be discarded.
    ///
    /// Server errors of class 20 and above terminate the connection on the
    /// server side as well.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Server { class, .. } => *class >= 20,
            Self::FilterConfig(_) | Self::Type(_) | Self::Config(_) => false,
            _ => true,
        }
    }

    /// Check if this error is transient and may succeed on retry.
    ///
    /// Deadlock victims (1205) and lock timeouts (1222) are worth retrying on
    /// a fresh request; transport failures on a fresh connection.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Server { number, .. } => matches!(number, 1205 | 1222),
            Self::Connect(_)
            | Self::ConnectTimeout
            | Self::CommandTimeout
            | Self::ConnectionClosed
            | Self::Io(_) => true,
            _ => false,
        }
    }

    /// Check if this is a server error with a specific number.
    #[must_use]
    pub fn is_server_error(&self, number: i32) -> bool {
        matches!(self, Self::Server { number: n, .. } if *n == number)
    }

    /// Get the error class/severity if this is a server error.
    ///
    /// SQL Server error classes range from 0-25:
    /// - 0-10: Informational
    /// - 11-16: User errors
    /// - 17-19: Resource/hardware errors
    /// - 20-25: System errors (connection terminating)
    #[must_use]
    pub fn class(&self) -> Option<u8> {
        match self {
            Self::Server { class, .. } => Some(*class),
            _ => None,
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Protocol(p) => Self::Protocol(p),
            CodecError::Io(io) => Self::Io(io),
            CodecError::ConnectionClosed => Self::ConnectionClosed,
            CodecError::TruncatedFrame { declared, available } => Self::Protocol(ProtocolError::IncompletePacket {
                expected: declared,
                actual: available,
            }),
            // Oversize or mixed frames, a message cut short, or a server
            // packet size outside the protocol bounds.
            other => Self::Protocol(ProtocolError::InvalidField {
                field: "frame",
                reason: other.to_string(),
            }),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
