//! Type conversion error types.

use thiserror::Error;

/// Errors raised while converting column values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// The value is NULL but the target type cannot hold NULL.
    #[error("unexpected null value")]
    UnexpectedNull,

    /// The value's SQL type does not convert to the requested Rust type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Requested Rust type.
        expected: &'static str,
        /// SQL type of the value.
        actual: &'static str,
    },

    /// The value does not fit the target type.
    #[error("value out of range for {target_type}")]
    OutOfRange {
        /// Target type name.
        target_type: &'static str,
    },

    /// The raw value has a length the column type cannot have.
    #[error("invalid {type_name} length: {length}")]
    InvalidLength {
        /// SQL type name.
        type_name: &'static str,
        /// Length of the raw value.
        length: usize,
    },

    /// Text could not be decoded.
    #[error("invalid string encoding: {0}")]
    InvalidEncoding(String),

    /// A date or time component is out of range.
    #[error("invalid date/time: {0}")]
    InvalidDateTime(String),

    /// A decimal does not fit `rust_decimal`.
    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),

    /// The column type is framed but has no value conversion.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// No column with the given index or name exists in the row.
    #[error("column not found: {0}")]
    ColumnNotFound(String),
}
