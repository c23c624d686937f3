//! Canned responses and their token encoding.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tdslink_protocol::{
    ColMetaData, ColumnMeta, Done, RawRow, ServerMessage, TdsVersion, TokenType, TypeId, TypeInfo,
};
use tdslink_types::{DEFAULT_COLLATION, SqlValue, encode_value, type_info_for};

use crate::error::{MockServerError, Result};

/// Handler computing a response from the batch text.
pub type ResponseFn = Arc<dyn Fn(&str) -> MockResponse + Send + Sync>;

/// Mock response configuration.
#[derive(Clone)]
pub enum MockResponse {
    /// A single unnamed column with one row.
    Scalar(SqlValue),

    /// One result set.
    Rows {
        /// Column definitions.
        columns: Vec<MockColumn>,
        /// Row data, one value per column.
        rows: Vec<Vec<SqlValue>>,
    },

    /// An ERROR token followed by a DONE with the error bit.
    Error {
        /// Error number.
        number: i32,
        /// Error message.
        message: String,
        /// Severity class.
        severity: u8,
    },

    /// An INFO token; `next` supplies the rest of the response.
    Info {
        /// Message number.
        number: i32,
        /// Message text.
        message: String,
        /// Response after the message.
        next: Box<MockResponse>,
    },

    /// A DONE carrying a row count (INSERT/UPDATE/DELETE).
    RowsAffected(u64),

    /// Several statements, sent as one response with DONE_MORE between them.
    Multi(Vec<MockResponse>),

    /// Pre-encoded tokens, sent unchanged.
    Raw(Bytes),

    /// Send nothing and keep the connection open.
    Hang,

    /// Wait, then send the inner response.
    Delay(Duration, Box<MockResponse>),

    /// Close the connection without answering.
    Disconnect,

    /// Compute the response from the batch text.
    Custom(ResponseFn),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", &rows.len())
                .finish(),
            Self::Error {
                number,
                message,
                severity,
            } => f
                .debug_struct("Error")
                .field("number", number)
                .field("message", message)
                .field("severity", severity)
                .finish(),
            Self::Info { number, next, .. } => f
                .debug_struct("Info")
                .field("number", number)
                .field("next", next)
                .finish_non_exhaustive(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Multi(parts) => f.debug_tuple("Multi").field(parts).finish(),
            Self::Raw(data) => f.debug_tuple("Raw").field(&data.len()).finish(),
            Self::Hang => f.write_str("Hang"),
            Self::Delay(d, inner) => f.debug_tuple("Delay").field(d).field(inner).finish(),
            Self::Disconnect => f.write_str("Disconnect"),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Scalar response.
    pub fn scalar(value: impl Into<SqlValue>) -> Self {
        Self::Scalar(value.into())
    }

    /// Statement with no rows and no count.
    pub fn empty() -> Self {
        Self::Multi(Vec::new())
    }

    /// Rows affected response.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// Error response with severity 16.
    pub fn error(number: i32, message: impl Into<String>) -> Self {
        Self::Error {
            number,
            message: message.into(),
            severity: 16,
        }
    }

    /// Multi-row response.
    pub fn rows(columns: Vec<MockColumn>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self::Rows { columns, rows }
    }

    /// Precede `self` with an INFO message.
    #[must_use]
    pub fn with_info(self, number: i32, message: impl Into<String>) -> Self {
        Self::Info {
            number,
            message: message.into(),
            next: Box::new(self),
        }
    }

    /// Compute the response per batch.
    pub fn custom(f: impl Fn(&str) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Encode the token stream answering `sql`.
    ///
    /// Connection-level behaviors ([`Hang`](Self::Hang),
    /// [`Delay`](Self::Delay), [`Disconnect`](Self::Disconnect)) have no
    /// token form and are rejected.
    pub fn encode(&self, sql: &str) -> Result<Bytes> {
        self.encode_for(sql, TdsVersion::default())
    }

    /// Encode the token stream in the DONE layout of `version`.
    pub fn encode_for(&self, sql: &str, version: TdsVersion) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        self.encode_into(sql, version, false, &mut dst)?;
        Ok(dst.freeze())
    }

    fn encode_into(&self, sql: &str, version: TdsVersion, more: bool, dst: &mut BytesMut) -> Result<()> {
        let put_done = |done: Done, dst: &mut BytesMut| {
            let done = if more { done.with_more() } else { done };
            done.encode_for(TokenType::Done, version, dst);
        };
        match self {
            Self::Scalar(value) => {
                let column = MockColumn::new("", type_info_for(value));
                encode_result_set(std::slice::from_ref(&column), std::slice::from_ref(&vec![value.clone()]), dst)?;
                put_done(Done::new(Some(1)), dst);
            }
            Self::Rows { columns, rows } => {
                encode_result_set(columns, rows, dst)?;
                put_done(Done::new(Some(rows.len() as u64)), dst);
            }
            Self::Error {
                number,
                message,
                severity,
            } => {
                server_message(*number, *severity, message).encode_as(TokenType::Error, dst);
                put_done(Done::new(None).with_error(), dst);
            }
            Self::Info { number, message, next } => {
                server_message(*number, 0, message).encode_as(TokenType::Info, dst);
                next.encode_into(sql, version, more, dst)?;
            }
            Self::RowsAffected(n) => put_done(Done::new(Some(*n)), dst),
            Self::Multi(parts) if parts.is_empty() => put_done(Done::new(None), dst),
            Self::Multi(parts) => {
                let last = parts.len() - 1;
                for (i, part) in parts.iter().enumerate() {
                    part.encode_into(sql, version, more || i < last, dst)?;
                }
            }
            Self::Raw(bytes) => dst.put_slice(bytes),
            Self::Custom(f) => f(sql).encode_into(sql, version, more, dst)?,
            Self::Hang | Self::Delay(..) | Self::Disconnect => {
                return Err(MockServerError::Protocol(format!(
                    "{self:?} controls the connection and cannot be encoded as tokens"
                )));
            }
        }
        Ok(())
    }
}

impl From<SqlValue> for MockResponse {
    fn from(value: SqlValue) -> Self {
        Self::Scalar(value)
    }
}

/// Mock column definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockColumn {
    /// Column name.
    pub name: String,
    /// Column type.
    pub type_info: TypeInfo,
}

impl MockColumn {
    /// Create a column of any type.
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            name: name.into(),
            type_info,
        }
    }

    /// INT column.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::with_length(TypeId::IntN, 4))
    }

    /// BIGINT column.
    pub fn bigint(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::with_length(TypeId::IntN, 8))
    }

    /// BIT column.
    pub fn bit(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::with_length(TypeId::BitN, 1))
    }

    /// NVARCHAR column of `max_len` characters.
    pub fn nvarchar(name: impl Into<String>, max_len: u32) -> Self {
        Self::new(
            name,
            TypeInfo::with_length(TypeId::NVarChar, max_len * 2).with_collation(DEFAULT_COLLATION),
        )
    }

    /// VARCHAR column in the default Latin1 collation.
    pub fn varchar(name: impl Into<String>, max_len: u32) -> Self {
        Self::new(
            name,
            TypeInfo::with_length(TypeId::BigVarChar, max_len).with_collation(DEFAULT_COLLATION),
        )
    }

    /// DECIMAL(precision, scale) column.
    pub fn decimal(name: impl Into<String>, precision: u8, scale: u8) -> Self {
        Self::new(name, TypeInfo::with_length(TypeId::DecimalN, 17).with_precision(precision, scale))
    }

    /// DATETIME2(7) column.
    pub fn datetime2(name: impl Into<String>) -> Self {
        Self::new(name, TypeInfo::new(TypeId::DateTime2).with_scale(7))
    }
}

fn encode_result_set(columns: &[MockColumn], rows: &[Vec<SqlValue>], dst: &mut BytesMut) -> Result<()> {
    let meta = ColMetaData {
        columns: columns
            .iter()
            .map(|c| ColumnMeta::new(c.name.clone(), c.type_info.clone()))
            .collect(),
    };
    meta.encode(dst);
    for row in rows {
        if row.len() != columns.len() {
            return Err(MockServerError::Protocol(format!(
                "row has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        let values = row
            .iter()
            .zip(columns)
            .map(|(value, column)| encode_value(value, &column.type_info))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        RawRow { values }.encode(&meta, dst);
    }
    Ok(())
}

pub(crate) fn server_message(number: i32, class: u8, message: &str) -> ServerMessage {
    ServerMessage {
        number,
        state: 1,
        class,
        message: message.to_string(),
        server: "tdslink-mock".to_string(),
        procedure: String::new(),
        line: 1,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tdslink_protocol::{Token, TokenParser};

    fn tokens(response: &MockResponse) -> Vec<Token> {
        let mut parser = TokenParser::new(response.encode("SELECT 1").unwrap());
        let mut meta: Option<ColMetaData> = None;
        let mut out = Vec::new();
        while let Some(token) = parser.next_token(meta.as_ref()).unwrap() {
            if let Token::ColMetaData(m) = &token {
                meta = Some(m.clone());
            }
            out.push(token);
        }
        out
    }

    #[test]
    fn test_scalar_encoding() {
        let t = tokens(&MockResponse::scalar(7i32));
        assert_eq!(t.len(), 3);
        assert!(matches!(&t[0], Token::ColMetaData(m) if m.len() == 1));
        assert!(matches!(&t[1], Token::Row(r) if r.values[0].as_deref() == Some(&7i32.to_le_bytes()[..])));
        assert!(matches!(&t[2], Token::Done(d) if !d.has_more() && d.rows_affected() == Some(1)));
    }

    #[test]
    fn test_multi_sets_more_bits() {
        let response = MockResponse::Multi(vec![MockResponse::affected(2), MockResponse::scalar(1i32)]);
        let dones: Vec<_> = tokens(&response).into_iter().filter_map(|t| t.as_done().cloned()).collect();
        assert_eq!(dones.len(), 2);
        assert!(dones[0].has_more());
        assert!(!dones[1].has_more());
    }

    #[test]
    fn test_error_encoding() {
        let t = tokens(&MockResponse::error(208, "Invalid object name 'x'."));
        assert!(matches!(&t[0], Token::Error(m) if m.number == 208 && m.class == 16));
        assert!(matches!(&t[1], Token::Done(d) if d.has_error()));
    }

    #[test]
    fn test_info_precedes_response() {
        let t = tokens(&MockResponse::affected(1).with_info(5701, "Changed database context"));
        assert!(matches!(&t[0], Token::Info(m) if m.number == 5701));
        assert!(matches!(&t[1], Token::Done(_)));
    }

    #[test]
    fn test_tds_7_1_layout() {
        let response = MockResponse::Multi(vec![MockResponse::affected(2), MockResponse::affected(3)]);
        let encoded = response.encode_for("", TdsVersion::V7_1).unwrap();
        assert_eq!(encoded.len(), 2 * (1 + Done::NARROW_SIZE));

        let mut parser = TokenParser::with_version(encoded, TdsVersion::V7_1);
        let first = parser.next_token(None).unwrap().unwrap();
        assert!(first.as_done().unwrap().has_more());
        let second = parser.next_token(None).unwrap().unwrap();
        assert_eq!(second.as_done().unwrap().rows_affected(), Some(3));
        assert!(!parser.has_remaining());
    }

    #[test]
    fn test_row_width_mismatch() {
        let response = MockResponse::rows(vec![MockColumn::int("a")], vec![vec![]]);
        assert!(response.encode("").is_err());
    }

    #[test]
    fn test_control_responses_have_no_tokens() {
        assert!(MockResponse::Hang.encode("").is_err());
        assert!(MockResponse::Disconnect.encode("").is_err());
    }
}
