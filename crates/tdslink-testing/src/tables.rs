//! In-memory table store with per-connection transactions.
//!
//! Tables only hold a row count, which is all the isolation checks need.
//! Committed counts live in a [`TableStore`] shared by every connection of
//! a server. Each connection works through its own [`TableSession`], which
//! keeps inserts made inside an open transaction private until `COMMIT`.
//!
//! Recognized statements (case-insensitive, optional trailing `;`):
//!
//! ```text
//! BEGIN TRAN[SACTION] | COMMIT [TRAN[SACTION]] | ROLLBACK [TRAN[SACTION]]
//! CREATE TABLE name (...)   DROP TABLE name
//! INSERT INTO name [(cols)] VALUES (...)[, (...)]
//! SELECT COUNT(*) FROM name
//! ... INFORMATION_SCHEMA.TABLES ...
//! ```
//!
//! DDL is not transactional here: `CREATE TABLE` and `DROP TABLE` apply at
//! once even inside a transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use tdslink_protocol::{EnvChange, EnvChangeType};
use tdslink_types::SqlValue;
use tokio::sync::Mutex;

use crate::response::{MockColumn, MockResponse};

const DEFAULT_SCHEMA: &str = "dbo";

/// First descriptor handed out; non-trivial in every byte position.
const FIRST_DESCRIPTOR: u64 = 0x0000_0001_0000_0001;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Parse `t`, `s.t`, `[s].[t]` or `db.s.t`.
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.split('(').next()?.trim();
        let mut parts: Vec<String> = raw
            .split('.')
            .map(|p| p.trim().trim_start_matches('[').trim_end_matches(']').to_string())
            .collect();
        if parts.iter().any(String::is_empty) {
            return None;
        }
        let table = parts.pop()?;
        let schema = parts.pop().unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
        Some(Self { schema, table })
    }

    fn key(&self) -> String {
        format!("{}.{}", self.schema, self.table).to_lowercase()
    }
}

#[derive(Debug)]
struct TableData {
    name: TableName,
    rows: u64,
}

/// Committed tables shared by all connections of a server.
#[derive(Debug)]
pub struct TableStore {
    tables: Mutex<BTreeMap<String, TableData>>,
    next_descriptor: AtomicU64,
}

impl Default for TableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TableStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(BTreeMap::new()),
            next_descriptor: AtomicU64::new(FIRST_DESCRIPTOR),
        }
    }

    /// Create a table with `rows` committed rows, replacing any existing one.
    pub async fn create(&self, schema: &str, table: &str, rows: u64) {
        let name = TableName {
            schema: schema.to_string(),
            table: table.to_string(),
        };
        self.tables.lock().await.insert(name.key(), TableData { name, rows });
    }

    /// Committed row count of a table, `None` if it does not exist.
    pub async fn committed_rows(&self, table: &str) -> Option<u64> {
        let name = TableName::parse(table)?;
        self.tables.lock().await.get(&name.key()).map(|t| t.rows)
    }

    /// `(schema, table)` of every table, in catalog order.
    pub async fn list(&self) -> Vec<(String, String)> {
        self.tables
            .lock()
            .await
            .values()
            .map(|t| (t.name.schema.clone(), t.name.table.clone()))
            .collect()
    }

    fn allocate_descriptor(&self) -> u64 {
        self.next_descriptor.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct OpenTransaction {
    descriptor: u64,
    depth: u32,
    pending: HashMap<String, u64>,
}

/// Parsed statement.
#[derive(Debug, PartialEq, Eq)]
enum Statement {
    Begin,
    Commit,
    Rollback,
    Create(TableName),
    Drop(TableName),
    Insert(TableName, u64),
    Count(TableName),
    Catalog,
}

impl Statement {
    fn parse(sql: &str) -> Option<Self> {
        let text = sql.trim().trim_end_matches(';').trim();
        let upper = text.to_ascii_uppercase();
        if upper.contains("INFORMATION_SCHEMA.TABLES") {
            return Some(Self::Catalog);
        }
        let words: Vec<&str> = text.split_whitespace().collect();
        let upper_words: Vec<&str> = upper.split_whitespace().collect();
        match upper_words.as_slice() {
            ["BEGIN", "TRAN" | "TRANSACTION"] => Some(Self::Begin),
            ["COMMIT"] | ["COMMIT", "TRAN" | "TRANSACTION"] => Some(Self::Commit),
            ["ROLLBACK"] | ["ROLLBACK", "TRAN" | "TRANSACTION"] => Some(Self::Rollback),
            ["CREATE", "TABLE", ..] => TableName::parse(words.get(2)?).map(Self::Create),
            ["DROP", "TABLE", _] => TableName::parse(words.get(2)?).map(Self::Drop),
            ["INSERT", "INTO", ..] => {
                let name = TableName::parse(words.get(2)?)?;
                Some(Self::Insert(name, count_value_rows(text, &upper)))
            }
            ["SELECT", "COUNT(*)", "FROM", _] => TableName::parse(words.get(3)?).map(Self::Count),
            _ => None,
        }
    }
}

/// Number of parenthesized tuples after `VALUES`; 1 for other insert forms.
fn count_value_rows(text: &str, upper: &str) -> u64 {
    let Some(start) = upper.find("VALUES") else {
        return 1;
    };
    let mut depth = 0u32;
    let mut rows = 0u64;
    let mut in_string = false;
    for c in text[start..].chars() {
        match c {
            '\'' => in_string = !in_string,
            '(' if !in_string => {
                if depth == 0 {
                    rows += 1;
                }
                depth += 1;
            }
            ')' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    rows.max(1)
}

/// One connection's view of the store.
#[derive(Debug)]
pub struct TableSession {
    store: Arc<TableStore>,
    transaction: Option<OpenTransaction>,
}

impl TableSession {
    /// Start a session with no open transaction.
    #[must_use]
    pub fn new(store: Arc<TableStore>) -> Self {
        Self {
            store,
            transaction: None,
        }
    }

    /// Descriptor of the open transaction.
    #[must_use]
    pub fn transaction_descriptor(&self) -> Option<u64> {
        self.transaction.as_ref().map(|t| t.descriptor)
    }

    /// Run `sql` if it is a statement the store understands.
    ///
    /// `descriptor` is the one the client sent in ALL_HEADERS, if any. A
    /// descriptor naming a transaction other than this session's is
    /// rejected.
    pub async fn execute(&mut self, sql: &str, descriptor: Option<u64>) -> Option<MockResponse> {
        let statement = Statement::parse(sql)?;
        if let Some(err) = self.check_descriptor(descriptor) {
            return Some(err);
        }
        tracing::trace!(?statement, "table store statement");
        Some(match statement {
            Statement::Begin => self.begin(),
            Statement::Commit => self.commit().await,
            Statement::Rollback => self.rollback(),
            Statement::Create(name) => self.create(name).await,
            Statement::Drop(name) => self.drop_table(name).await,
            Statement::Insert(name, rows) => self.insert(name, rows).await,
            Statement::Count(name) => self.count(name).await,
            Statement::Catalog => self.catalog().await,
        })
    }

    fn check_descriptor(&self, descriptor: Option<u64>) -> Option<MockResponse> {
        let sent = descriptor?;
        let expected = self.transaction_descriptor().unwrap_or(0);
        (sent != expected).then(|| {
            MockResponse::error(
                3910,
                format!("Transaction context 0x{sent:016X} is not the active context 0x{expected:016X}."),
            )
        })
    }

    fn begin(&mut self) -> MockResponse {
        if let Some(tx) = self.transaction.as_mut() {
            tx.depth += 1;
            return MockResponse::empty();
        }
        let descriptor = self.store.allocate_descriptor();
        tracing::debug!(descriptor, "transaction began");
        self.transaction = Some(OpenTransaction {
            descriptor,
            depth: 1,
            pending: HashMap::new(),
        });
        transaction_change(
            EnvChange::binary(
                EnvChangeType::BeginTransaction,
                Bytes::copy_from_slice(&descriptor.to_le_bytes()),
                Bytes::new(),
            ),
        )
    }

    async fn commit(&mut self) -> MockResponse {
        let Some(tx) = self.transaction.as_mut() else {
            return MockResponse::error(
                3902,
                "The COMMIT TRANSACTION request has no corresponding BEGIN TRANSACTION.",
            );
        };
        if tx.depth > 1 {
            tx.depth -= 1;
            return MockResponse::empty();
        }
        let Some(tx) = self.transaction.take() else {
            return MockResponse::empty();
        };
        let mut tables = self.store.tables.lock().await;
        for (key, rows) in tx.pending {
            if let Some(table) = tables.get_mut(&key) {
                table.rows += rows;
            }
        }
        tracing::debug!(descriptor = tx.descriptor, "transaction committed");
        transaction_change(EnvChange::binary(
            EnvChangeType::CommitTransaction,
            Bytes::new(),
            Bytes::copy_from_slice(&tx.descriptor.to_le_bytes()),
        ))
    }

    fn rollback(&mut self) -> MockResponse {
        let Some(tx) = self.transaction.take() else {
            return MockResponse::error(
                3903,
                "The ROLLBACK TRANSACTION request has no corresponding BEGIN TRANSACTION.",
            );
        };
        tracing::debug!(descriptor = tx.descriptor, "transaction rolled back");
        transaction_change(EnvChange::binary(
            EnvChangeType::RollbackTransaction,
            Bytes::new(),
            Bytes::copy_from_slice(&tx.descriptor.to_le_bytes()),
        ))
    }

    async fn create(&mut self, name: TableName) -> MockResponse {
        let mut tables = self.store.tables.lock().await;
        let key = name.key();
        if tables.contains_key(&key) {
            return MockResponse::error(
                2714,
                format!("There is already an object named '{}' in the database.", name.table),
            );
        }
        tables.insert(key, TableData { name, rows: 0 });
        MockResponse::empty()
    }

    async fn drop_table(&mut self, name: TableName) -> MockResponse {
        let key = name.key();
        if self.store.tables.lock().await.remove(&key).is_none() {
            return MockResponse::error(
                3701,
                format!("Cannot drop the table '{}', because it does not exist.", name.table),
            );
        }
        if let Some(tx) = self.transaction.as_mut() {
            tx.pending.remove(&key);
        }
        MockResponse::empty()
    }

    async fn insert(&mut self, name: TableName, rows: u64) -> MockResponse {
        let key = name.key();
        let mut tables = self.store.tables.lock().await;
        let Some(table) = tables.get_mut(&key) else {
            return invalid_object(&name);
        };
        match self.transaction.as_mut() {
            Some(tx) => *tx.pending.entry(key).or_default() += rows,
            None => table.rows += rows,
        }
        MockResponse::affected(rows)
    }

    async fn count(&self, name: TableName) -> MockResponse {
        let key = name.key();
        let Some(committed) = self.store.tables.lock().await.get(&key).map(|t| t.rows) else {
            return invalid_object(&name);
        };
        let own = self
            .transaction
            .as_ref()
            .and_then(|tx| tx.pending.get(&key).copied())
            .unwrap_or(0);
        let total = i32::try_from(committed + own).unwrap_or(i32::MAX);
        MockResponse::rows(vec![MockColumn::int("")], vec![vec![SqlValue::Int(total)]])
    }

    async fn catalog(&self) -> MockResponse {
        let rows = self
            .store
            .list()
            .await
            .into_iter()
            .map(|(schema, table)| vec![SqlValue::String(schema), SqlValue::String(table)])
            .collect();
        MockResponse::rows(
            vec![MockColumn::nvarchar("TABLE_SCHEMA", 128), MockColumn::nvarchar("TABLE_NAME", 128)],
            rows,
        )
    }
}

fn invalid_object(name: &TableName) -> MockResponse {
    MockResponse::error(208, format!("Invalid object name '{}'.", name.table))
}

fn transaction_change(change: EnvChange) -> MockResponse {
    let mut tokens = BytesMut::new();
    change.encode(&mut tokens);
    MockResponse::Multi(vec![MockResponse::Raw(tokens.freeze()), MockResponse::empty()])
}
