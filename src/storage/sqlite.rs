//! SQLite storage backend (embedded file engine)
//!
//! rusqlite is synchronous, so every statement runs on tokio's blocking pool
//! and a database file locked by another process never stalls an executor
//! thread. The connection itself is the only serialization point inside the
//! process; across processes SQLite's own file locking applies.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{Row, StorageBackend, Transaction, Value};
use crate::{Error, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type ConnGuard = OwnedMutexGuard<Connection>;

/// SQLite-backed storage engine.
///
/// A single connection is shared behind an async mutex. A transaction holds
/// the mutex for its whole lifetime, so writers are serialized and every
/// read-decide-write sequence inside a transaction is atomic.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Open a database file (creates it and its parent directory if missing)
    pub fn open(path: &Path) -> Result<Self> {
        crate::config::ensure_db_dir(path)?;
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Opened sqlite database {} (journal_mode={})", path.display(), mode);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file path, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn lock(&self) -> ConnGuard {
        Arc::clone(&self.conn).lock_owned().await
    }
}

impl fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let (sql, params) = (sql.to_string(), params.to_vec());
        let (_conn, out) = blocking(self.lock().await, move |conn| {
            discard_abandoned(conn)?;
            execute(conn, &sql, &params)
        })
        .await?;
        out
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let (sql, params) = (sql.to_string(), params.to_vec());
        let (_conn, out) = blocking(self.lock().await, move |conn| {
            discard_abandoned(conn)?;
            query(conn, &sql, &params)
        })
        .await?;
        out
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        // IMMEDIATE takes the write lock up front so a read-then-write
        // sequence cannot be interleaved by another connection to the file.
        let (conn, out) = blocking(self.lock().await, |conn| {
            discard_abandoned(conn)?;
            conn.execute_batch("BEGIN IMMEDIATE").map_err(classify)
        })
        .await?;
        out?;
        Ok(Box::new(SqliteTransaction {
            conn: Some(conn),
            finished: false,
        }))
    }
}

/// Transaction holding exclusive use of the shared connection.
///
/// The guard travels to the blocking pool with each statement and comes back
/// with its result; `conn` is only `None` while a statement is in flight.
pub struct SqliteTransaction {
    conn: Option<ConnGuard>,
    finished: bool,
}

impl SqliteTransaction {
    async fn run<T, F>(&mut self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.take().ok_or_else(|| {
            Error::Io(io::Error::other("sqlite transaction lost its connection"))
        })?;
        let (conn, out) = blocking(conn, f).await?;
        self.conn = Some(conn);
        out
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let (sql, params) = (sql.to_string(), params.to_vec());
        self.run(move |conn| execute(conn, &sql, &params)).await
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let (sql, params) = (sql.to_string(), params.to_vec());
        self.run(move |conn| query(conn, &sql, &params)).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.run(|conn| conn.execute_batch("COMMIT").map_err(classify))
            .await?;
        this.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let out = this
            .run(|conn| conn.execute_batch("ROLLBACK").map_err(classify))
            .await;
        this.finished = true;
        out
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let Some(conn) = self.conn.take() else {
            return;
        };
        // The guard is released only after the rollback has run.
        let rollback = move || {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!("Failed to roll back abandoned transaction: {}", e);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(rollback);
            }
            Err(_) => rollback(),
        }
    }
}

/// Run `f` on the blocking pool, handing the guard back with its result
async fn blocking<T, F>(conn: ConnGuard, f: F) -> Result<(ConnGuard, Result<T>)>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let out = f(&*conn);
        (conn, out)
    })
    .await
    .map_err(|e| Error::Io(io::Error::other(e)))
}

/// Roll back a transaction whose owner went away mid-statement
fn discard_abandoned(conn: &Connection) -> Result<()> {
    if !conn.is_autocommit() {
        warn!("Rolling back a transaction left open on the connection");
        conn.execute_batch("ROLLBACK").map_err(classify)?;
    }
    Ok(())
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

fn execute(conn: &Connection, sql: &str, params: &[Value]) -> Result<u64> {
    let mut stmt = conn.prepare_cached(sql).map_err(classify)?;
    let changed = stmt.execute(params_from_iter(params.iter())).map_err(classify)?;
    Ok(changed as u64)
}

fn query(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare_cached(sql).map_err(classify)?;
    let columns = stmt.column_count();
    let mut rows = stmt.query(params_from_iter(params.iter())).map_err(classify)?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(classify)? {
        let mut values = Vec::with_capacity(columns);
        for idx in 0..columns {
            let value = match row.get_ref(idx)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::Integer(v),
                ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
                ValueRef::Real(v) => {
                    return Err(Error::Decode(format!("column {idx}: unexpected real {v}")));
                }
                ValueRef::Blob(_) => {
                    return Err(Error::Decode(format!("column {idx}: unexpected blob")));
                }
            };
            values.push(value);
        }
        out.push(Row::new(values));
    }
    Ok(out)
}

/// Map uniqueness violations to `Conflict`, keep everything else as storage errors
fn classify(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            Error::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
        }
        _ => Error::Sqlite(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend_with_table() -> SqliteBackend {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend
            .execute("CREATE TABLE kv (k TEXT NOT NULL PRIMARY KEY, v BIGINT)", &[])
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let backend = backend_with_table().await;

        let n = backend
            .execute("INSERT INTO kv (k, v) VALUES (?, ?)", &["a".into(), Value::Integer(1)])
            .await
            .unwrap();
        assert_eq!(n, 1);

        let rows = backend
            .query("SELECT k, v FROM kv WHERE k = ?", &["a".into()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text(0).unwrap(), "a");
        assert_eq!(rows[0].integer(1).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unique_violation_is_conflict() {
        let backend = backend_with_table().await;
        backend
            .execute("INSERT INTO kv (k, v) VALUES ('a', 1)", &[])
            .await
            .unwrap();

        let err = backend
            .execute("INSERT INTO kv (k, v) VALUES ('a', 2)", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_syntax_error_is_storage() {
        let backend = backend_with_table().await;
        let err = backend.execute("INSERT INTO nope VALUES (1)", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Sqlite(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_commit_and_rollback() {
        let backend = backend_with_table().await;

        let mut tx = backend.begin().await.unwrap();
        tx.execute("INSERT INTO kv (k, v) VALUES ('kept', 1)", &[]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = backend.begin().await.unwrap();
        tx.execute("INSERT INTO kv (k, v) VALUES ('undone', 1)", &[]).await.unwrap();
        tx.rollback().await.unwrap();

        {
            let mut tx = backend.begin().await.unwrap();
            tx.execute("INSERT INTO kv (k, v) VALUES ('dropped', 1)", &[]).await.unwrap();
        }

        let rows = backend.query("SELECT k FROM kv ORDER BY k", &[]).await.unwrap();
        let keys: Vec<&str> = rows.iter().map(|r| r.text(0).unwrap()).collect();
        assert_eq!(keys, vec!["kept"]);
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_connection() {
        let backend = backend_with_table().await;
        {
            let mut tx = backend.begin().await.unwrap();
            tx.execute("INSERT INTO kv (k, v) VALUES ('dropped', 1)", &[]).await.unwrap();
        }

        // the next transaction waits for the rollback, then starts cleanly
        let mut tx = backend.begin().await.unwrap();
        let rows = tx.query("SELECT COUNT(*) FROM kv", &[]).await.unwrap();
        assert_eq!(rows[0].integer(0).unwrap(), 0);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_transaction_is_discarded() {
        let backend = backend_with_table().await;
        {
            let conn = backend.conn.lock().await;
            conn.execute_batch("BEGIN; INSERT INTO kv (k, v) VALUES ('stale', 1);")
                .unwrap();
        }

        let rows = backend.query("SELECT COUNT(*) FROM kv", &[]).await.unwrap();
        assert_eq!(rows[0].integer(0).unwrap(), 0);
        assert!(backend.conn.lock().await.is_autocommit());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_busy_file_does_not_block_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.db");
        let backend = SqliteBackend::open(&path).unwrap();
        backend.execute("CREATE TABLE t (x TEXT)", &[]).await.unwrap();

        // a second connection holds the write lock for a moment
        let other = Connection::open(&path).unwrap();
        other.execute_batch("BEGIN IMMEDIATE").unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            other.execute_batch("COMMIT").unwrap();
        });

        let write = tokio::spawn({
            let backend = backend.clone();
            async move { backend.execute("INSERT INTO t (x) VALUES ('a')", &[]).await }
        });
        let ticks = tokio::spawn(async {
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        tokio::time::timeout(Duration::from_millis(200), ticks)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(write.await.unwrap().unwrap(), 1);
        release.join().unwrap();
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend.execute("CREATE TABLE t (x TEXT)", &[]).await.unwrap();
            backend.execute("INSERT INTO t (x) VALUES ('hello')", &[]).await.unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.path(), Some(path.as_path()));
        let rows = backend.query("SELECT x FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].text(0).unwrap(), "hello");
    }
}
