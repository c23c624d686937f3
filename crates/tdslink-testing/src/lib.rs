//! # tdslink-testing
//!
//! Test infrastructure for tdslink.
//!
//! [`MockTdsServer`] listens on a loopback port and plays the server side of
//! the handshake and of SQL batches, so the client can be exercised end to
//! end without a database.
//!
//! ## Features
//!
//! - PRELOGIN, optional TLS (self-signed certificate), LOGIN7
//! - Canned responses: scalars, rows, errors, INFO messages, raw tokens
//! - Connection behaviors for failure tests: hang, delay, disconnect
//! - A shared table store with per-connection transactions, for isolation tests
//! - A log of every batch received, including its transaction descriptor
//!
//! ## Example
//!
//! ```rust,ignore
//! use tdslink_testing::{MockColumn, MockResponse, MockTdsServer};
//! use tdslink_types::SqlValue;
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockTdsServer::builder()
//!         .with_response(
//!             "SELECT id, name FROM users",
//!             MockResponse::rows(
//!                 vec![MockColumn::int("id"), MockColumn::nvarchar("name", 50)],
//!                 vec![vec![SqlValue::Int(1), SqlValue::String("Alice".into())]],
//!             ),
//!         )
//!         .with_table("dbo", "orders", 0)
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     // Connect a session to server.host() / server.port()
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod mock_server;
pub mod response;
pub mod tables;

pub use error::{MockServerError, Result};
pub use mock_server::{MockServerBuilder, MockServerConfig, MockTdsServer, ReceivedBatch};
pub use response::{MockColumn, MockResponse, ResponseFn};
pub use tables::{TableSession, TableStore};
