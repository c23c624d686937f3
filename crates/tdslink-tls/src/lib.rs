//! # tdslink-tls
//!
//! TLS upgrade for TDS 7.x connections.
//!
//! Encryption is negotiated in the cleartext PRELOGIN exchange. When the
//! server selects it, the TLS handshake runs over the same socket with its
//! records wrapped in PRELOGIN packets; after that every byte, starting with
//! LOGIN7, is a TLS record.
//!
//! ```text
//! TCP connect → PRELOGIN (cleartext) → TLS handshake (in PRELOGIN packets) → LOGIN7 (encrypted)
//! ```
//!
//! Certificates are validated against the Mozilla root store unless custom
//! roots are configured. `trust_server_certificate` disables validation and
//! logs a warning.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod prelogin_wrapper;

pub use config::{TlsConfig, TlsVersion};
pub use connector::TlsConnector;
pub use error::TlsError;
pub use prelogin_wrapper::TlsPreloginWrapper;

pub use tokio_rustls::client::TlsStream;
