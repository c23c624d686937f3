//! Response token stream.
//!
//! The payload of a TABULAR_RESULT message is a sequence of tokens. Each
//! token starts with a one-byte discriminant; the body is either fixed-size
//! (DONE family, RETURNSTATUS), prefixed with a two-byte length (ERROR, INFO,
//! LOGINACK, ENVCHANGE, ORDER) or self-describing through the preceding
//! COLMETADATA (COLMETADATA itself, ROW, NBCROW).
//!
//! ```rust,ignore
//! use tdslink_protocol::token::{Token, TokenParser};
//!
//! let mut parser = TokenParser::new(payload);
//! let mut metadata = None;
//! while let Some(token) = parser.next_token(metadata.as_ref())? {
//!     match token {
//!         Token::ColMetaData(meta) => metadata = Some(meta),
//!         Token::Row(row) => println!("{} columns", row.values.len()),
//!         Token::Done(done) if !done.has_more() => break,
//!         _ => {}
//!     }
//! }
//! ```

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{ensure_remaining, read_b_varchar, read_us_varchar, write_b_varchar, write_us_varchar};
use crate::error::ProtocolError;
use crate::types::{ColumnFlags, TypeInfo, ValueFraming};
use crate::version::TdsVersion;

/// PLP total length announcing a NULL value.
const PLP_NULL: u64 = u64::MAX;

/// PLP total length announcing a value of unknown size.
const PLP_UNKNOWN_LEN: u64 = u64::MAX - 1;

/// COLMETADATA column count announcing "no metadata".
const NO_METADATA: u16 = 0xFFFF;

/// Token discriminants this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenType {
    /// Stored procedure return status.
    ReturnStatus = 0x79,
    /// Column metadata.
    ColMetaData = 0x81,
    /// ORDER BY column list.
    Order = 0xA9,
    /// Error message.
    Error = 0xAA,
    /// Informational message.
    Info = 0xAB,
    /// Login acknowledgment.
    LoginAck = 0xAD,
    /// Row data.
    Row = 0xD1,
    /// Null-bitmap compressed row.
    NbcRow = 0xD2,
    /// Environment change.
    EnvChange = 0xE3,
    /// Statement completion.
    Done = 0xFD,
    /// Stored procedure completion.
    DoneProc = 0xFE,
    /// Statement completion inside a procedure.
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Map a discriminant. Unknown values are a protocol error: their body
    /// length cannot be inferred, so they cannot be skipped.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0x79 => Self::ReturnStatus,
            0x81 => Self::ColMetaData,
            0xA9 => Self::Order,
            0xAA => Self::Error,
            0xAB => Self::Info,
            0xAD => Self::LoginAck,
            0xD1 => Self::Row,
            0xD2 => Self::NbcRow,
            0xE3 => Self::EnvChange,
            0xFD => Self::Done,
            0xFE => Self::DoneProc,
            0xFF => Self::DoneInProc,
            other => return Err(ProtocolError::InvalidTokenType(other)),
        })
    }
}

/// A decoded token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// DONE.
    Done(Done),
    /// DONEPROC.
    DoneProc(Done),
    /// DONEINPROC.
    DoneInProc(Done),
    /// ERROR.
    Error(ServerMessage),
    /// INFO.
    Info(ServerMessage),
    /// LOGINACK.
    LoginAck(LoginAck),
    /// ENVCHANGE.
    EnvChange(EnvChange),
    /// COLMETADATA.
    ColMetaData(ColMetaData),
    /// ROW.
    Row(RawRow),
    /// NBCROW, expanded to the same shape as ROW.
    NbcRow(RawRow),
    /// ORDER.
    Order(Order),
    /// RETURNSTATUS.
    ReturnStatus(i32),
}

impl Token {
    /// The DONE-family payload, if this is one.
    #[must_use]
    pub fn as_done(&self) -> Option<&Done> {
        match self {
            Self::Done(done) | Self::DoneProc(done) | Self::DoneInProc(done) => Some(done),
            _ => None,
        }
    }
}

bitflags! {
    /// DONE status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DoneStatus: u16 {
        /// More results follow.
        const MORE = 0x0001;
        /// The statement failed.
        const ERROR = 0x0002;
        /// A transaction is in progress.
        const IN_XACT = 0x0004;
        /// `row_count` is valid.
        const COUNT = 0x0010;
        /// Acknowledges an attention.
        const ATTN = 0x0020;
        /// Server error severe enough to discard results.
        const SRVERROR = 0x0100;
    }
}

/// DONE, DONEPROC and DONEINPROC body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Done {
    /// Status bits.
    pub status: DoneStatus,
    /// Token of the current command.
    pub cur_cmd: u16,
    /// Rows affected, valid when `COUNT` is set.
    pub row_count: u64,
}

impl Done {
    /// Body size in bytes from TDS 7.2 on.
    pub const SIZE: usize = 12;

    /// Body size in bytes before TDS 7.2, where the row count is 32 bits.
    pub const NARROW_SIZE: usize = 8;

    /// Body size under the given protocol version.
    #[must_use]
    pub const fn size_for(version: TdsVersion) -> usize {
        if version.has_wide_row_count() { Self::SIZE } else { Self::NARROW_SIZE }
    }

    /// Final DONE with an optional row count.
    #[must_use]
    pub fn new(row_count: Option<u64>) -> Self {
        Self {
            status: if row_count.is_some() { DoneStatus::COUNT } else { DoneStatus::empty() },
            cur_cmd: 0,
            row_count: row_count.unwrap_or(0),
        }
    }

    /// Set the MORE bit.
    #[must_use]
    pub fn with_more(mut self) -> Self {
        self.status |= DoneStatus::MORE;
        self
    }

    /// Set the ERROR bit.
    #[must_use]
    pub fn with_error(mut self) -> Self {
        self.status |= DoneStatus::ERROR;
        self
    }

    /// Decode the 12-byte body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        Self::decode_for(src, TdsVersion::default())
    }

    /// Decode the body as sent under `version`.
    pub fn decode_for(src: &mut impl Buf, version: TdsVersion) -> Result<Self, ProtocolError> {
        ensure_remaining(src, Self::size_for(version))?;
        let status = DoneStatus::from_bits_retain(src.get_u16_le());
        let cur_cmd = src.get_u16_le();
        let row_count = if version.has_wide_row_count() {
            src.get_u64_le()
        } else {
            u64::from(src.get_u32_le())
        };
        Ok(Self {
            status,
            cur_cmd,
            row_count,
        })
    }

    /// Encode as a token of the given DONE-family kind.
    pub fn encode_as(&self, kind: TokenType, dst: &mut impl BufMut) {
        self.encode_for(kind, TdsVersion::default(), dst);
    }

    /// Encode as a DONE-family token in the layout of `version`.
    ///
    /// Counts above `u32::MAX` saturate on the narrow layout.
    pub fn encode_for(&self, kind: TokenType, version: TdsVersion, dst: &mut impl BufMut) {
        dst.put_u8(kind as u8);
        dst.put_u16_le(self.status.bits());
        dst.put_u16_le(self.cur_cmd);
        if version.has_wide_row_count() {
            dst.put_u64_le(self.row_count);
        } else {
            dst.put_u32_le(u32::try_from(self.row_count).unwrap_or(u32::MAX));
        }
    }

    /// Encode as a plain DONE token.
    pub fn encode(&self, dst: &mut impl BufMut) {
        self.encode_as(TokenType::Done, dst);
    }

    /// Whether more results follow for the same request.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.status.contains(DoneStatus::MORE)
    }

    /// Whether the statement failed.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.status.contains(DoneStatus::ERROR) || self.status.contains(DoneStatus::SRVERROR)
    }

    /// Rows affected, if the server reported a count.
    #[must_use]
    pub const fn rows_affected(&self) -> Option<u64> {
        if self.status.contains(DoneStatus::COUNT) {
            Some(self.row_count)
        } else {
            None
        }
    }
}

/// ERROR or INFO body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// Error state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name.
    pub procedure: String,
    /// Line number in the batch or procedure.
    pub line: i32,
}

impl ServerMessage {
    /// Decode the length-prefixed body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = length_prefixed_body(src)?;
        ensure_remaining(&body, 6)?;
        let number = body.get_i32_le();
        let state = body.get_u8();
        let class = body.get_u8();
        let message = read_us_varchar(&mut body, "message text")?;
        let server = read_b_varchar(&mut body, "server name")?;
        let procedure = read_b_varchar(&mut body, "procedure name")?;
        ensure_remaining(&body, 4)?;
        let line = body.get_i32_le();
        Ok(Self {
            number,
            state,
            class,
            message,
            server,
            procedure,
            line,
        })
    }

    /// Encode as an ERROR or INFO token.
    pub fn encode_as(&self, kind: TokenType, dst: &mut impl BufMut) {
        let mut body = BytesMut::new();
        body.put_i32_le(self.number);
        body.put_u8(self.state);
        body.put_u8(self.class);
        write_us_varchar(&mut body, &self.message);
        write_b_varchar(&mut body, &self.server);
        write_b_varchar(&mut body, &self.procedure);
        body.put_i32_le(self.line);
        put_length_prefixed(kind, &body, dst);
    }
}

/// LOGINACK body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface (1 = SQL).
    pub interface: u8,
    /// Negotiated TDS version.
    pub tds_version: TdsVersion,
    /// Server program name.
    pub prog_name: String,
    /// Server program version: major, minor, build high, build low.
    pub prog_version: [u8; 4],
}

impl LoginAck {
    /// Decode the length-prefixed body.
    ///
    /// The TDS version is carried big-endian, unlike every other integer in
    /// the token stream.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = length_prefixed_body(src)?;
        ensure_remaining(&body, 5)?;
        let interface = body.get_u8();
        let tds_version = TdsVersion::new(body.get_u32());
        let prog_name = read_b_varchar(&mut body, "program name")?;
        ensure_remaining(&body, 4)?;
        let mut prog_version = [0u8; 4];
        body.copy_to_slice(&mut prog_version);
        Ok(Self {
            interface,
            tds_version,
            prog_name,
            prog_version,
        })
    }

    /// Encode as a LOGINACK token.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let mut body = BytesMut::new();
        body.put_u8(self.interface);
        body.put_u32(self.tds_version.raw());
        write_b_varchar(&mut body, &self.prog_name);
        body.put_slice(&self.prog_version);
        put_length_prefixed(TokenType::LoginAck, &body, dst);
    }
}

/// ENVCHANGE sub-types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvChangeType {
    /// Current database.
    Database,
    /// Session language.
    Language,
    /// Character set.
    CharacterSet,
    /// Negotiated packet size.
    PacketSize,
    /// SQL collation.
    SqlCollation,
    /// A transaction began; new value is the descriptor.
    BeginTransaction,
    /// A transaction committed.
    CommitTransaction,
    /// A transaction rolled back.
    RollbackTransaction,
    /// A transaction ended without an explicit commit or rollback.
    TransactionEnded,
    /// Any sub-type not interpreted by this client.
    Other(u8),
}

impl EnvChangeType {
    /// Map a raw sub-type.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Database,
            2 => Self::Language,
            3 => Self::CharacterSet,
            4 => Self::PacketSize,
            7 => Self::SqlCollation,
            8 => Self::BeginTransaction,
            9 => Self::CommitTransaction,
            10 => Self::RollbackTransaction,
            17 => Self::TransactionEnded,
            other => Self::Other(other),
        }
    }

    /// Raw sub-type.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Database => 1,
            Self::Language => 2,
            Self::CharacterSet => 3,
            Self::PacketSize => 4,
            Self::SqlCollation => 7,
            Self::BeginTransaction => 8,
            Self::CommitTransaction => 9,
            Self::RollbackTransaction => 10,
            Self::TransactionEnded => 17,
            Self::Other(other) => other,
        }
    }

    /// Whether the values are UTF-16 strings rather than byte strings.
    const fn carries_text(self) -> bool {
        matches!(
            self,
            Self::Database | Self::Language | Self::CharacterSet | Self::PacketSize
        )
    }
}

/// An ENVCHANGE value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChangeValue {
    /// Text value.
    String(String),
    /// Binary value.
    Binary(Bytes),
}

impl EnvChangeValue {
    /// The value as text, if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Binary(_) => None,
        }
    }
}

/// ENVCHANGE body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvChange {
    /// Sub-type.
    pub env_type: EnvChangeType,
    /// New value.
    pub new_value: EnvChangeValue,
    /// Old value.
    pub old_value: EnvChangeValue,
}

impl EnvChange {
    /// Text-valued change.
    #[must_use]
    pub fn text(env_type: EnvChangeType, new_value: impl Into<String>, old_value: impl Into<String>) -> Self {
        Self {
            env_type,
            new_value: EnvChangeValue::String(new_value.into()),
            old_value: EnvChangeValue::String(old_value.into()),
        }
    }

    /// Binary-valued change.
    #[must_use]
    pub fn binary(env_type: EnvChangeType, new_value: impl Into<Bytes>, old_value: impl Into<Bytes>) -> Self {
        Self {
            env_type,
            new_value: EnvChangeValue::Binary(new_value.into()),
            old_value: EnvChangeValue::Binary(old_value.into()),
        }
    }

    /// Decode the length-prefixed body. Unknown sub-types keep their raw
    /// bytes as the new value.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = length_prefixed_body(src)?;
        ensure_remaining(&body, 1)?;
        let env_type = EnvChangeType::from_u8(body.get_u8());

        if let EnvChangeType::Other(_) = env_type {
            let rest = body.copy_to_bytes(body.remaining());
            return Ok(Self::binary(env_type, rest, Bytes::new()));
        }

        let (new_value, old_value) = if env_type.carries_text() {
            (
                EnvChangeValue::String(read_b_varchar(&mut body, "envchange new value")?),
                EnvChangeValue::String(read_b_varchar(&mut body, "envchange old value")?),
            )
        } else {
            (
                EnvChangeValue::Binary(read_b_varbyte(&mut body)?),
                EnvChangeValue::Binary(read_b_varbyte(&mut body)?),
            )
        };

        Ok(Self {
            env_type,
            new_value,
            old_value,
        })
    }

    /// Encode as an ENVCHANGE token.
    pub fn encode(&self, dst: &mut impl BufMut) {
        let mut body = BytesMut::new();
        body.put_u8(self.env_type.as_u8());
        for value in [&self.new_value, &self.old_value] {
            match value {
                EnvChangeValue::String(s) => write_b_varchar(&mut body, s),
                EnvChangeValue::Binary(b) => {
                    body.put_u8(b.len() as u8);
                    body.put_slice(b);
                }
            }
        }
        put_length_prefixed(TokenType::EnvChange, &body, dst);
    }

    /// New packet size, for a packet-size change.
    ///
    /// The server sends the size as ASCII digits.
    pub fn packet_size(&self) -> Result<Option<u32>, ProtocolError> {
        if self.env_type != EnvChangeType::PacketSize {
            return Ok(None);
        }
        let text = self.new_value.as_str().unwrap_or_default();
        text.trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ProtocolError::InvalidField {
                field: "packet size",
                reason: format!("'{text}' is not a number"),
            })
    }

    /// Transaction descriptor of a BEGIN_TRANSACTION change.
    pub fn begin_transaction_descriptor(&self) -> Result<Option<u64>, ProtocolError> {
        if self.env_type != EnvChangeType::BeginTransaction {
            return Ok(None);
        }
        match &self.new_value {
            EnvChangeValue::Binary(bytes) if bytes.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Ok(Some(u64::from_le_bytes(raw)))
            }
            _ => Err(ProtocolError::InvalidField {
                field: "transaction descriptor",
                reason: "expected 8 bytes".into(),
            }),
        }
    }

    /// Whether this change closes the active transaction.
    #[must_use]
    pub fn ends_transaction(&self) -> bool {
        matches!(
            self.env_type,
            EnvChangeType::CommitTransaction
                | EnvChangeType::RollbackTransaction
                | EnvChangeType::TransactionEnded
        )
    }
}

/// One column in COLMETADATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Column name.
    pub name: String,
    /// User type id.
    pub user_type: u32,
    /// Column flags.
    pub flags: ColumnFlags,
    /// Type information.
    pub type_info: TypeInfo,
}

impl ColumnMeta {
    /// Column with the given name and type.
    #[must_use]
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            user_type: 0,
            flags: ColumnFlags(ColumnFlags::NULLABLE),
            type_info,
        }
    }
}

/// COLMETADATA body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColMetaData {
    /// Columns in order.
    pub columns: Vec<ColumnMeta>,
}

impl ColMetaData {
    /// Decode the column list.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        ensure_remaining(src, 2)?;
        let count = src.get_u16_le();
        if count == NO_METADATA {
            return Ok(Self::default());
        }

        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            ensure_remaining(src, 6)?;
            let user_type = src.get_u32_le();
            let flags = ColumnFlags(src.get_u16_le());
            let type_info = TypeInfo::decode(src)?;
            let name = read_b_varchar(src, "column name")?;
            columns.push(ColumnMeta {
                name,
                user_type,
                flags,
                type_info,
            });
        }
        Ok(Self { columns })
    }

    /// Encode as a COLMETADATA token.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(TokenType::ColMetaData as u8);
        dst.put_u16_le(self.columns.len() as u16);
        for column in &self.columns {
            dst.put_u32_le(column.user_type);
            dst.put_u16_le(column.flags.0);
            column.type_info.encode(dst);
            write_b_varchar(dst, &column.name);
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether there are no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Row values framed but not yet converted: one entry per column, `None` for
/// NULL, length prefixes stripped and PLP chunks joined.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawRow {
    /// Column values.
    pub values: Vec<Option<Bytes>>,
}

impl RawRow {
    /// Decode a ROW body.
    pub fn decode(src: &mut impl Buf, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let values = metadata
            .columns
            .iter()
            .map(|column| read_value(src, &column.type_info))
            .collect::<Result<_, _>>()?;
        Ok(Self { values })
    }

    /// Decode an NBCROW body: a null bitmap, then only the non-null values.
    pub fn decode_nbc(src: &mut impl Buf, metadata: &ColMetaData) -> Result<Self, ProtocolError> {
        let bitmap_len = metadata.len().div_ceil(8);
        ensure_remaining(src, bitmap_len)?;
        let bitmap = src.copy_to_bytes(bitmap_len);

        let mut values = Vec::with_capacity(metadata.len());
        for (i, column) in metadata.columns.iter().enumerate() {
            if bitmap[i / 8] & (1 << (i % 8)) != 0 {
                values.push(None);
            } else {
                values.push(read_value(src, &column.type_info)?);
            }
        }
        Ok(Self { values })
    }

    /// Encode as a ROW token.
    pub fn encode(&self, metadata: &ColMetaData, dst: &mut impl BufMut) {
        dst.put_u8(TokenType::Row as u8);
        for (value, column) in self.values.iter().zip(&metadata.columns) {
            write_value(dst, &column.type_info, value.as_deref());
        }
    }
}

/// ORDER body: 1-based ordinals of the ORDER BY columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Order {
    /// Column ordinals.
    pub columns: Vec<u16>,
}

impl Order {
    /// Decode the length-prefixed body.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        let mut body = length_prefixed_body(src)?;
        let mut columns = Vec::with_capacity(body.remaining() / 2);
        while body.remaining() >= 2 {
            columns.push(body.get_u16_le());
        }
        Ok(Self { columns })
    }
}

/// Pull-style token decoder over one reassembled message.
///
/// The parser never performs I/O. When it runs dry the caller decides, from
/// the last DONE token, whether to receive another message and feed it to a
/// fresh parser.
#[derive(Debug, Clone)]
pub struct TokenParser {
    data: Bytes,
    position: usize,
    version: TdsVersion,
}

impl TokenParser {
    /// Parser over one message payload, assuming the current TDS version.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self::with_version(data, TdsVersion::default())
    }

    /// Parser over one message payload sent under `version`.
    ///
    /// A LOGINACK switches the parser to the acknowledged version for the
    /// tokens that follow it.
    #[must_use]
    pub fn with_version(data: Bytes, version: TdsVersion) -> Self {
        Self {
            data,
            position: 0,
            version,
        }
    }

    /// Protocol version the next token is decoded under.
    #[must_use]
    pub fn version(&self) -> TdsVersion {
        self.version
    }

    /// Unconsumed bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Whether any bytes are left.
    #[must_use]
    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }

    /// Byte offset of the next token.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Decode the next token, or `None` at the end of the payload.
    ///
    /// ROW and NBCROW need the metadata of the current result set.
    pub fn next_token(&mut self, metadata: Option<&ColMetaData>) -> Result<Option<Token>, ProtocolError> {
        if !self.has_remaining() {
            return Ok(None);
        }

        let mut buf = self.data.slice(self.position..);
        let kind = TokenType::from_u8(buf.get_u8())?;

        let token = match kind {
            TokenType::Done => Token::Done(Done::decode_for(&mut buf, self.version)?),
            TokenType::DoneProc => Token::DoneProc(Done::decode_for(&mut buf, self.version)?),
            TokenType::DoneInProc => Token::DoneInProc(Done::decode_for(&mut buf, self.version)?),
            TokenType::Error => Token::Error(ServerMessage::decode(&mut buf)?),
            TokenType::Info => Token::Info(ServerMessage::decode(&mut buf)?),
            TokenType::LoginAck => {
                let ack = LoginAck::decode(&mut buf)?;
                self.version = ack.tds_version;
                Token::LoginAck(ack)
            }
            TokenType::EnvChange => Token::EnvChange(EnvChange::decode(&mut buf)?),
            TokenType::ColMetaData => Token::ColMetaData(ColMetaData::decode(&mut buf)?),
            TokenType::Order => Token::Order(Order::decode(&mut buf)?),
            TokenType::ReturnStatus => {
                ensure_remaining(&buf, 4)?;
                Token::ReturnStatus(buf.get_i32_le())
            }
            TokenType::Row => {
                let meta = metadata.ok_or(ProtocolError::MissingColumnMetadata)?;
                Token::Row(RawRow::decode(&mut buf, meta)?)
            }
            TokenType::NbcRow => {
                let meta = metadata.ok_or(ProtocolError::MissingColumnMetadata)?;
                Token::NbcRow(RawRow::decode_nbc(&mut buf, meta)?)
            }
        };

        self.position = self.data.len() - buf.remaining();
        Ok(Some(token))
    }
}

/// Read a `u16` length and return that many bytes.
fn length_prefixed_body(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    ensure_remaining(src, 2)?;
    let len = src.get_u16_le() as usize;
    ensure_remaining(src, len)?;
    Ok(src.copy_to_bytes(len))
}

/// Write a token discriminant, a `u16` length and the body.
fn put_length_prefixed(kind: TokenType, body: &[u8], dst: &mut impl BufMut) {
    dst.put_u8(kind as u8);
    dst.put_u16_le(body.len() as u16);
    dst.put_slice(body);
}

fn read_b_varbyte(src: &mut impl Buf) -> Result<Bytes, ProtocolError> {
    ensure_remaining(src, 1)?;
    let len = src.get_u8() as usize;
    ensure_remaining(src, len)?;
    Ok(src.copy_to_bytes(len))
}

fn read_value(src: &mut impl Buf, type_info: &TypeInfo) -> Result<Option<Bytes>, ProtocolError> {
    match type_info.framing() {
        ValueFraming::Fixed(0) => Ok(None),
        ValueFraming::Fixed(size) => {
            ensure_remaining(src, size)?;
            Ok(Some(src.copy_to_bytes(size)))
        }
        ValueFraming::ByteLen => {
            ensure_remaining(src, 1)?;
            match src.get_u8() as usize {
                0 => Ok(None),
                len => {
                    ensure_remaining(src, len)?;
                    Ok(Some(src.copy_to_bytes(len)))
                }
            }
        }
        ValueFraming::UShortLen => {
            ensure_remaining(src, 2)?;
            match src.get_u16_le() {
                0xFFFF => Ok(None),
                len => {
                    ensure_remaining(src, len as usize)?;
                    Ok(Some(src.copy_to_bytes(len as usize)))
                }
            }
        }
        ValueFraming::Plp => read_plp(src),
    }
}

fn read_plp(src: &mut impl Buf) -> Result<Option<Bytes>, ProtocolError> {
    ensure_remaining(src, 8)?;
    let total = src.get_u64_le();
    if total == PLP_NULL {
        return Ok(None);
    }

    let capacity = if total == PLP_UNKNOWN_LEN { 0 } else { total as usize };
    let mut value = BytesMut::with_capacity(capacity.min(1 << 20));
    loop {
        ensure_remaining(src, 4)?;
        let chunk = src.get_u32_le() as usize;
        if chunk == 0 {
            break;
        }
        ensure_remaining(src, chunk)?;
        value.extend_from_slice(&src.copy_to_bytes(chunk));
    }

    if total != PLP_UNKNOWN_LEN && value.len() as u64 != total {
        return Err(ProtocolError::InvalidField {
            field: "plp length",
            reason: format!("announced {total} bytes, received {}", value.len()),
        });
    }
    Ok(Some(value.freeze()))
}

fn write_value(dst: &mut impl BufMut, type_info: &TypeInfo, value: Option<&[u8]>) {
    match (type_info.framing(), value) {
        (ValueFraming::Fixed(_), Some(v)) => dst.put_slice(v),
        (ValueFraming::Fixed(size), None) => dst.put_bytes(0, size),
        (ValueFraming::ByteLen, Some(v)) => {
            dst.put_u8(v.len() as u8);
            dst.put_slice(v);
        }
        (ValueFraming::ByteLen, None) => dst.put_u8(0),
        (ValueFraming::UShortLen, Some(v)) => {
            dst.put_u16_le(v.len() as u16);
            dst.put_slice(v);
        }
        (ValueFraming::UShortLen, None) => dst.put_u16_le(0xFFFF),
        (ValueFraming::Plp, Some(v)) => {
            dst.put_u64_le(v.len() as u64);
            if !v.is_empty() {
                dst.put_u32_le(v.len() as u32);
                dst.put_slice(v);
            }
            dst.put_u32_le(0);
        }
        (ValueFraming::Plp, None) => dst.put_u64_le(PLP_NULL),
    }
}
