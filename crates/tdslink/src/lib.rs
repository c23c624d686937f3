//! # tdslink
//!
//! Async client for the TDS wire protocol.
//!
//! A [`Session`] opens a connection, negotiates encryption in PRELOGIN,
//! upgrades to TLS when both sides agree, authenticates with LOGIN7 and
//! then runs SQL batches. Responses are decoded lazily into typed rows.
//! The session threads the server's transaction descriptor through every
//! request; `BEGIN`/`COMMIT`/`ROLLBACK` are ordinary batches and the
//! server stays the authority on transaction state.
//!
//! ```text
//! Session ──SQL_BATCH──▶ PacketFramer ──▶ [TLS] ──▶ server
//! Session ◀──tokens── TokenParser ◀── message ◀── [TLS] ◀── server
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tdslink::{CatalogVisibilityFilter, Config, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_connection_string(
//!         "Server=localhost;Database=test;User Id=sa;Password=Password123;Encrypt=true",
//!     )?;
//!     let mut session = Session::connect(config).await?;
//!
//!     session.begin_transaction().await?;
//!     session.execute("INSERT INTO audit VALUES (1)").await?;
//!     session.commit().await?;
//!
//!     for row in session.query("SELECT name FROM sys.databases").await? {
//!         let name: String = row.get(0)?;
//!         println!("{name}");
//!     }
//!
//!     let filter = CatalogVisibilityFilter::new().with_schema_filter("^dbo$")?;
//!     for table in session.discover_tables(&filter).await? {
//!         println!("{table}");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod handshake;
pub mod result;
pub mod row;
pub mod session;
pub mod state;
pub mod transport;

pub use catalog::CatalogEntry;
pub use config::{Config, Credentials, EncryptionMode, TimeoutConfig};
pub use error::{Error, Result};
pub use filter::{CatalogVisibilityFilter, FilterConfigError, FilterPattern, NameMatcher};
pub use handshake::{HandshakeNegotiator, HandshakeState, negotiate};
pub use result::BatchResult;
pub use row::{Column, Row};
pub use session::Session;
pub use tdslink_protocol::{Done, DoneStatus, ServerMessage, TdsVersion};
pub use tdslink_tls::TlsConfig;
pub use tdslink_types::{FromSql, SqlValue, TypeError};
pub use transport::Transport;
