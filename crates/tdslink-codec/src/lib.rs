//! # tdslink-codec
//!
//! Framing layer between a byte stream and whole TDS messages.
//!
//! ```text
//! payload ──PacketFramer::encode──▶ packets ──TdsCodec──▶ bytes
//! bytes ──TdsCodec──▶ packets ──MessageAssembler──▶ Message
//! ```
//!
//! [`PacketFramer`] is synchronous and usable on plain buffers;
//! [`Connection`] runs the same logic over any `AsyncRead + AsyncWrite`
//! transport, plain TCP or TLS.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framer;
pub mod message;
pub mod packet_codec;

pub use connection::Connection;
pub use error::CodecError;
pub use framer::{FIRST_PACKET_ID, PacketFramer};
pub use message::{Message, MessageAssembler};
pub use packet_codec::{Packet, TdsCodec};
