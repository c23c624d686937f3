//! TLS error types.

use thiserror::Error;

/// Errors raised while upgrading a connection to TLS.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The TLS handshake did not complete.
    #[error("TLS handshake failed: {0}")]
    HandshakeFailed(String),

    /// A configured root certificate could not be added to the trust store.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The host name cannot be used for SNI or certificate validation.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// The configuration cannot produce a rustls client config.
    #[error("TLS configuration error: {0}")]
    Configuration(String),

    /// Transport failure during the handshake.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error reported by rustls.
    #[error("rustls error: {0}")]
    Rustls(#[from] rustls::Error),
}
