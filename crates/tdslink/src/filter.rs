//! Schema and table visibility filtering for catalog discovery.
//!
//! A filter holds up to two patterns, one for schema names and one for
//! table names. Patterns are regular expressions matched case-insensitively
//! anywhere in the name; callers wanting an exact match anchor the pattern
//! themselves (`^sales$`).
//!
//! ```rust
//! use tdslink::CatalogVisibilityFilter;
//!
//! let mut filter = CatalogVisibilityFilter::new();
//! assert!(filter.matches_schema("dbo"));
//!
//! filter.set_schema_filter("^sales$").unwrap();
//! assert!(!filter.matches_schema("dbo"));
//! assert!(filter.matches_schema("SALES"));
//!
//! assert!(filter.set_schema_filter("(abc").is_err());
//! assert!(filter.matches_schema("sales"));
//! ```

use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use thiserror::Error;

/// A rejected filter pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterConfigError {
    /// The pattern is not a valid regular expression.
    #[error("invalid {scope} filter pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// `schema` or `table`.
        scope: &'static str,
        /// Pattern text as supplied.
        pattern: String,
        /// Compiler diagnostic.
        reason: String,
    },
}

/// Compiled matcher over object names.
pub trait NameMatcher: Send + Sync + fmt::Debug {
    /// Whether `name` is accepted.
    fn is_match(&self, name: &str) -> bool;
}

impl NameMatcher for Regex {
    fn is_match(&self, name: &str) -> bool {
        Regex::is_match(self, name)
    }
}

/// A compiled pattern together with its source text.
///
/// Only valid patterns are ever constructed; a failed compile yields an
/// error instead of a pattern.
#[derive(Clone)]
pub struct FilterPattern {
    source: String,
    matcher: Arc<dyn NameMatcher>,
}

impl FilterPattern {
    /// Compile a case-insensitive, unanchored pattern.
    pub fn compile(scope: &'static str, pattern: &str) -> Result<Self, FilterConfigError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| FilterConfigError::InvalidPattern {
                scope,
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::with_matcher(pattern, regex))
    }

    /// Wrap any matcher.
    pub fn with_matcher(source: impl Into<String>, matcher: impl NameMatcher + 'static) -> Self {
        Self {
            source: source.into(),
            matcher: Arc::new(matcher),
        }
    }

    /// Pattern text as supplied.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether `name` is accepted.
    #[must_use]
    pub fn is_match(&self, name: &str) -> bool {
        self.matcher.is_match(name)
    }
}

impl fmt::Debug for FilterPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterPattern").field(&self.source).finish()
    }
}

/// Include filters for catalog discovery.
///
/// Reconfiguration replaces a pattern wholesale; a rejected pattern leaves
/// the previous one in place. A configured filter is read-only and may be
/// shared across sessions behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct CatalogVisibilityFilter {
    schema: Option<FilterPattern>,
    table: Option<FilterPattern>,
}

impl CatalogVisibilityFilter {
    /// A filter that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the schema pattern. An empty pattern clears it.
    pub fn set_schema_filter(&mut self, pattern: &str) -> Result<(), FilterConfigError> {
        self.schema = Self::compile("schema", pattern)?;
        Ok(())
    }

    /// Set the table pattern. An empty pattern clears it.
    pub fn set_table_filter(&mut self, pattern: &str) -> Result<(), FilterConfigError> {
        self.table = Self::compile("table", pattern)?;
        Ok(())
    }

    /// Builder form of [`set_schema_filter`](Self::set_schema_filter).
    pub fn with_schema_filter(mut self, pattern: &str) -> Result<Self, FilterConfigError> {
        self.set_schema_filter(pattern)?;
        Ok(self)
    }

    /// Builder form of [`set_table_filter`](Self::set_table_filter).
    pub fn with_table_filter(mut self, pattern: &str) -> Result<Self, FilterConfigError> {
        self.set_table_filter(pattern)?;
        Ok(self)
    }

    /// Remove both patterns.
    pub fn clear(&mut self) {
        self.schema = None;
        self.table = None;
    }

    /// Current schema pattern.
    #[must_use]
    pub fn schema_filter(&self) -> Option<&str> {
        self.schema.as_ref().map(FilterPattern::source)
    }

    /// Current table pattern.
    #[must_use]
    pub fn table_filter(&self) -> Option<&str> {
        self.table.as_ref().map(FilterPattern::source)
    }

    /// Whether a schema name passes.
    #[must_use]
    pub fn matches_schema(&self, name: &str) -> bool {
        self.schema.as_ref().is_none_or(|p| p.is_match(name))
    }

    /// Whether a table name passes.
    #[must_use]
    pub fn matches_table(&self, name: &str) -> bool {
        self.table.as_ref().is_none_or(|p| p.is_match(name))
    }

    /// Whether an object passes both patterns.
    #[must_use]
    pub fn is_visible(&self, schema: &str, table: &str) -> bool {
        self.matches_schema(schema) && self.matches_table(table)
    }

    fn compile(scope: &'static str, pattern: &str) -> Result<Option<FilterPattern>, FilterConfigError> {
        if pattern.is_empty() {
            return Ok(None);
        }
        FilterPattern::compile(scope, pattern).map(Some)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_no_filter_matches_everything() {
        let filter = CatalogVisibilityFilter::new();
        assert!(filter.matches_schema("dbo"));
        assert!(filter.matches_table(""));
        assert!(filter.is_visible("any", "thing"));
    }

    #[test]
    fn test_anchored_pattern() {
        let mut filter = CatalogVisibilityFilter::new();
        filter.set_schema_filter("^sales$").unwrap();
        assert!(!filter.matches_schema("dbo"));
        assert!(filter.matches_schema("sales"));
        assert!(!filter.matches_schema("presales"));
    }

    #[test]
    fn test_substring_match() {
        let mut filter = CatalogVisibilityFilter::new();
        filter.set_schema_filter("ales").unwrap();
        assert!(filter.matches_schema("sales"));
        assert!(filter.matches_schema("SALES_archive"));
    }

    #[test]
    fn test_invalid_pattern_keeps_previous() {
        let mut filter = CatalogVisibilityFilter::new();
        filter.set_schema_filter("^sales$").unwrap();

        let err = filter.set_schema_filter("(abc").unwrap_err();
        assert!(matches!(err, FilterConfigError::InvalidPattern { scope: "schema", .. }));
        assert_eq!(filter.schema_filter(), Some("^sales$"));
        assert!(filter.matches_schema("sales"));
        assert!(!filter.matches_schema("dbo"));
    }

    #[test]
    fn test_invalid_pattern_on_empty_filter() {
        let mut filter = CatalogVisibilityFilter::new();
        assert!(filter.set_table_filter("[").is_err());
        assert_eq!(filter.table_filter(), None);
        assert!(filter.matches_table("orders"));
    }

    #[test]
    fn test_empty_pattern_clears() {
        let mut filter = CatalogVisibilityFilter::new()
            .with_table_filter("^orders$")
            .unwrap();
        assert!(!filter.matches_table("customers"));
        filter.set_table_filter("").unwrap();
        assert!(filter.matches_table("customers"));
    }

    #[test]
    fn test_is_visible_needs_both() {
        let filter = CatalogVisibilityFilter::new()
            .with_schema_filter("^dbo$")
            .unwrap()
            .with_table_filter("^t_")
            .unwrap();
        assert!(filter.is_visible("dbo", "t_orders"));
        assert!(!filter.is_visible("dbo", "orders"));
        assert!(!filter.is_visible("sales", "t_orders"));
    }

    #[test]
    fn test_clear() {
        let mut filter = CatalogVisibilityFilter::new().with_schema_filter("x").unwrap();
        filter.clear();
        assert!(filter.matches_schema("dbo"));
        assert_eq!(filter.schema_filter(), None);
    }

    #[test]
    fn test_custom_matcher() {
        #[derive(Debug)]
        struct Prefix(&'static str);
        impl NameMatcher for Prefix {
            fn is_match(&self, name: &str) -> bool {
                name.starts_with(self.0)
            }
        }
        let pattern = FilterPattern::with_matcher("tmp*", Prefix("tmp"));
        assert!(pattern.is_match("tmp_1"));
        assert!(!pattern.is_match("x_tmp"));
    }

    #[test]
    fn test_filter_is_shareable() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<CatalogVisibilityFilter>();
    }

    proptest! {
        #[test]
        fn prop_literal_pattern_is_case_insensitive_substring(
            prefix in "[a-z0-9_]{0,8}",
            needle in "[a-z0-9_]{1,8}",
            suffix in "[a-z0-9_]{0,8}",
        ) {
            let mut filter = CatalogVisibilityFilter::new();
            filter.set_table_filter(&regex::escape(&needle)).unwrap();
            let name = format!("{prefix}{}{suffix}", needle.to_uppercase());
            prop_assert!(filter.matches_table(&name));
        }

        #[test]
        fn prop_literal_pattern_rejects_names_without_it(
            name in "[a-m]{0,12}",
            needle in "[n-z]{1,4}",
        ) {
            let mut filter = CatalogVisibilityFilter::new();
            filter.set_schema_filter(&regex::escape(&needle)).unwrap();
            prop_assert!(!filter.matches_schema(&name));
        }
    }
}
