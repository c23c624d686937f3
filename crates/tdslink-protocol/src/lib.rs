//! # tdslink-protocol
//!
//! IO-free encoding and decoding of the TDS (Tabular Data Stream) wire
//! structures used by the tdslink client: packet headers, PRELOGIN, LOGIN7,
//! SQL batch requests with their ALL_HEADERS preamble, and the response token
//! stream.
//!
//! Nothing in this crate touches a socket or an async runtime. Framing of
//! whole messages lives in `tdslink-codec`; session logic in `tdslink`.
//!
//! ```rust
//! use tdslink_protocol::{PacketHeader, PacketStatus, PacketType};
//!
//! let header = PacketHeader::new(PacketType::SqlBatch, PacketStatus::END_OF_MESSAGE, 100);
//! assert_eq!(header.payload_length(), 92);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod login7;
pub mod packet;
pub mod prelogin;
pub mod sql_batch;
pub mod token;
pub mod types;
pub mod version;

pub use error::ProtocolError;
pub use login7::{Login7, deobfuscate_password, obfuscate_password};
pub use packet::{
    DEFAULT_PACKET_SIZE, MAX_PACKET_SIZE, MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader,
    PacketStatus, PacketType,
};
pub use prelogin::{EncryptionLevel, PreLogin, PreLoginOption};
pub use sql_batch::{ALL_HEADERS_SIZE, AllHeaders, SqlBatch, encode_sql_batch};
pub use token::{
    ColMetaData, ColumnMeta, Done, DoneStatus, EnvChange, EnvChangeType, EnvChangeValue, LoginAck,
    Order, RawRow, ServerMessage, Token, TokenParser, TokenType,
};
pub use types::{Collation, ColumnFlags, TypeId, TypeInfo, ValueFraming};
pub use version::{ServerVersion, TdsVersion};
