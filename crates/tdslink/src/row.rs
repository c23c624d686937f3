//! Result set columns and rows.
//!
//! A [`Row`] keeps the raw column bytes exactly as the ROW token framed
//! them and shares its column list with every other row of the result set.
//! Values are converted to [`SqlValue`] only when read.

use std::sync::Arc;

use bytes::Bytes;
use tdslink_protocol::{ColMetaData, TypeInfo};
use tdslink_types::{FromSql, SqlValue, TypeError, decode_value};

/// Column metadata describing a result set column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name; empty for unnamed expressions.
    pub name: String,
    /// Column index (0-based).
    pub index: usize,
    /// Wire type.
    pub type_info: TypeInfo,
    /// Whether the column allows NULL values.
    pub nullable: bool,
}

impl Column {
    /// Build the column list of a COLMETADATA token.
    #[must_use]
    pub fn from_metadata(meta: &ColMetaData) -> Arc<[Column]> {
        meta.columns
            .iter()
            .enumerate()
            .map(|(index, col)| Column {
                name: col.name.clone(),
                index,
                type_info: col.type_info.clone(),
                nullable: col.flags.is_nullable(),
            })
            .collect()
    }
}

/// One row of a result set.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Option<Bytes>>,
}

impl Row {
    /// Wrap raw column values. `None` is NULL.
    #[must_use]
    pub fn new(columns: Arc<[Column]>, values: Vec<Option<Bytes>>) -> Self {
        Self { columns, values }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Columns of the result set this row belongs to.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Index of the first column with this name, compared case-insensitively.
    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Raw wire bytes of a column, `None` for NULL or a bad index.
    #[must_use]
    pub fn get_bytes(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index)?.as_deref()
    }

    /// Whether a column is NULL. Out-of-range indexes count as NULL.
    #[must_use]
    pub fn is_null(&self, index: usize) -> bool {
        self.values.get(index).is_none_or(Option::is_none)
    }

    /// Decode a column to a [`SqlValue`].
    pub fn value(&self, index: usize) -> Result<SqlValue, TypeError> {
        let column = self
            .columns
            .get(index)
            .ok_or_else(|| TypeError::ColumnNotFound(format!("index {index}")))?;
        let raw = self
            .values
            .get(index)
            .ok_or_else(|| TypeError::ColumnNotFound(format!("index {index}")))?;
        decode_value(raw.as_ref(), &column.type_info)
    }

    /// Get a value by column index with type conversion.
    ///
    /// NULL fails with [`TypeError::UnexpectedNull`]; read nullable columns
    /// as `Option<T>`.
    pub fn get<T: FromSql>(&self, index: usize) -> Result<T, TypeError> {
        T::from_sql(&self.value(index)?)
    }

    /// Get a value by column name with type conversion.
    pub fn get_by_name<T: FromSql>(&self, name: &str) -> Result<T, TypeError> {
        let index = self
            .find_column(name)
            .ok_or_else(|| TypeError::ColumnNotFound(name.to_string()))?;
        self.get(index)
    }

    /// Get a value by index, `None` if NULL, missing or not convertible.
    #[must_use]
    pub fn try_get<T: FromSql>(&self, index: usize) -> Option<T> {
        self.value(index).ok().and_then(|v| T::from_sql_nullable(&v).ok().flatten())
    }

    /// Get a value by name, `None` if NULL, missing or not convertible.
    #[must_use]
    pub fn try_get_by_name<T: FromSql>(&self, name: &str) -> Option<T> {
        self.try_get(self.find_column(name)?)
    }

    /// Decode every column.
    pub fn values(&self) -> Result<Vec<SqlValue>, TypeError> {
        (0..self.len()).map(|i| self.value(i)).collect()
    }
}
