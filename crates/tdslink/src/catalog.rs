//! Catalog discovery results.

use std::fmt;

use tdslink_types::TypeError;

use crate::row::Row;

/// Query listing every table and view the login can see.
pub const CATALOG_QUERY: &str = "SELECT TABLE_SCHEMA, TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                                 ORDER BY TABLE_SCHEMA, TABLE_NAME";

/// A table found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogEntry {
    /// Schema name.
    pub schema: String,
    /// Table name.
    pub table: String,
}

impl CatalogEntry {
    /// Create an entry.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Read an entry from a row of [`CATALOG_QUERY`].
    pub fn from_row(row: &Row) -> Result<Self, TypeError> {
        Ok(Self {
            schema: row.get(0)?,
            table: row.get(1)?,
        })
    }
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}
