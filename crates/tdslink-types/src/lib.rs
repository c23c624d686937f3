//! # tdslink-types
//!
//! Conversion between raw TDS column values and Rust types.
//!
//! | SQL type | [`SqlValue`] | Rust type |
//! |----------|--------------|-----------|
//! | `BIT` | `Bool` | `bool` |
//! | `TINYINT` | `TinyInt` | `u8` |
//! | `SMALLINT` | `SmallInt` | `i16` |
//! | `INT` | `Int` | `i32` |
//! | `BIGINT` | `BigInt` | `i64` |
//! | `REAL` / `FLOAT` | `Float` / `Double` | `f32` / `f64` |
//! | `DECIMAL` / `NUMERIC` | `Decimal` | `rust_decimal::Decimal` |
//! | `CHAR` / `VARCHAR` / `NCHAR` / `NVARCHAR` | `String` | `String` |
//! | `BINARY` / `VARBINARY` | `Binary` | `Vec<u8>`, `Bytes` |
//! | `DATE` | `Date` | `chrono::NaiveDate` |
//! | `TIME` | `Time` | `chrono::NaiveTime` |
//! | `DATETIME` / `SMALLDATETIME` / `DATETIME2` | `DateTime` | `chrono::NaiveDateTime` |
//! | `DATETIMEOFFSET` | `DateTimeOffset` | `chrono::DateTime<FixedOffset>` |
//!
//! `VARCHAR` data is decoded with the code page of the column collation.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod decode;
pub mod encode;
pub mod error;
pub mod from_sql;
pub mod value;

pub use decode::{decode_utf16_string, decode_value, encoding_for_collation};
pub use encode::{DEFAULT_COLLATION, encode_value, type_info_for};
pub use error::TypeError;
pub use from_sql::FromSql;
pub use value::SqlValue;
