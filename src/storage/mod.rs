//! Storage Layer - pluggable SQL execution engines
//!
//! All higher layers talk to a [`StorageBackend`] through parameterized
//! statements written once with `?` placeholders. Tables:
//! - documents(id, tenant, "index", data, created_at, updated_at)
//! - tags(tag, document_id)
//! - migrations(name, applied_at)
//!
//! Two engines implement the contract: [`SqliteBackend`] (embedded file) and,
//! with the `postgres` feature, `PostgresBackend` (managed server).

pub mod schema;
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;

use crate::{Error, Result};

pub use sqlite::SqliteBackend;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresBackend, PostgresConfig};

/// A statement parameter or a column value read back from a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A positional result row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Read a non-null text column
    pub fn text(&self, idx: usize) -> Result<&str> {
        match self.values.get(idx) {
            Some(Value::Text(s)) => Ok(s),
            other => Err(Error::Decode(format!("column {idx}: expected text, got {other:?}"))),
        }
    }

    /// Read a nullable text column
    pub fn opt_text(&self, idx: usize) -> Result<Option<&str>> {
        match self.values.get(idx) {
            Some(Value::Null) => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s)),
            other => Err(Error::Decode(format!("column {idx}: expected text, got {other:?}"))),
        }
    }

    /// Read a non-null integer column
    pub fn integer(&self, idx: usize) -> Result<i64> {
        match self.values.get(idx) {
            Some(Value::Integer(v)) => Ok(*v),
            other => Err(Error::Decode(format!("column {idx}: expected integer, got {other:?}"))),
        }
    }
}

/// An open transaction on a backend.
///
/// Statements issued through a transaction are not visible to other callers
/// until [`Transaction::commit`]. Dropping a transaction without committing
/// rolls it back.
#[async_trait]
pub trait Transaction: Send {
    /// Execute a write or DDL statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a read statement and collect every row.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A SQL-capable execution engine.
///
/// Implementations must be thread-safe and give identical semantics for the
/// portable SQL subset used by this crate (`TEXT`/`BIGINT` columns,
/// `ON CONFLICT` clauses, double-quoted identifiers).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short engine name used in logs ("sqlite", "postgres")
    fn name(&self) -> &'static str;

    /// Execute a single autocommitted statement.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a read statement outside any explicit transaction.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Start a transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

/// Build `?, ?, ?` for an `IN (...)` list of `n` parameters
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
