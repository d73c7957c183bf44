//! Embedded SQLite driver.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rusqlite::types::{Value, ValueRef};
use tracing::{debug_span, info};

use crate::driver::{hash_sql, sql_op_name, SqlDriver};
use crate::error::BackendError;
use crate::value::{DbRow, DbValue};

/// A single SQLite connection.
///
/// Statements run in autocommit mode unless the caller opened a transaction
/// with [`SqliteConnection::begin`]; [`SqlDriver::commit`] closes it.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteConnection {
    /// Open or create a database file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BackendError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    BackendError::Database(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = rusqlite::Connection::open(path)?;
        info!(path = %path.display(), "Opened SQLite database");

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, BackendError> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Ok(Self { conn, path: None })
    }

    /// How long SQLite itself waits on a busy database before reporting it locked.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), BackendError> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open an explicit transaction; ended by `commit`.
    pub fn begin(&mut self) -> Result<(), BackendError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn to_sqlite_params(params: &[DbValue]) -> Vec<Value> {
        params
            .iter()
            .map(|p| match p {
                DbValue::Null => Value::Null,
                DbValue::Integer(v) => Value::Integer(*v),
                DbValue::Real(v) => Value::Real(*v),
                DbValue::Text(v) => Value::Text(v.clone()),
                DbValue::Blob(v) => Value::Blob(v.clone()),
            })
            .collect()
    }

    fn sqlite_value_to_db_value(value: ValueRef<'_>) -> DbValue {
        match value {
            ValueRef::Null => DbValue::Null,
            ValueRef::Integer(v) => DbValue::Integer(v),
            ValueRef::Real(v) => DbValue::Real(v),
            ValueRef::Text(v) => DbValue::Text(String::from_utf8_lossy(v).to_string()),
            ValueRef::Blob(v) => DbValue::Blob(v.to_vec()),
        }
    }
}

impl SqlDriver for SqliteConnection {
    fn backend_name(&self) -> &'static str {
        "SQLite"
    }

    fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        let span = debug_span!(
            "db.exec",
            op = sql_op_name(sql),
            sql_hash = %hash_sql(sql),
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();

        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.execute(rusqlite::params_from_iter(Self::to_sqlite_params(params)))?;

        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(rows as u64)
    }

    fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError> {
        let span = debug_span!(
            "db.exec_batch",
            op = "BATCH",
            sql_hash = %hash_sql(sql),
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();
        self.conn.execute_batch(sql)?;
        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(())
    }

    fn query_all(&mut self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, BackendError> {
        let span = debug_span!(
            "db.query",
            op = sql_op_name(sql),
            sql_hash = %hash_sql(sql),
            duration_ms = tracing::field::Empty
        );
        let _guard = span.enter();
        let start = Instant::now();

        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();
        let column_count = columns.len();

        let mut rows = stmt.query(rusqlite::params_from_iter(Self::to_sqlite_params(params)))?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for index in 0..column_count {
                values.push(Self::sqlite_value_to_db_value(row.get_ref(index)?));
            }
            result.push(DbRow::new(columns.clone(), values));
        }

        span.record("duration_ms", start.elapsed().as_millis() as u64);
        Ok(result)
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn memory_with_table() -> SqliteConnection {
        let mut conn = SqliteConnection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT UNIQUE, score REAL)")
            .unwrap();
        conn
    }

    #[test]
    fn execute_and_query_round_trip() {
        let mut conn = memory_with_table();
        let inserted = conn
            .execute(
                "INSERT INTO t (name, score) VALUES (?, ?)",
                &[DbValue::from("alpha"), DbValue::from(1.5)],
            )
            .unwrap();
        assert_eq!(inserted, 1);

        let rows = conn
            .query_all("SELECT name, score FROM t WHERE name = ?", &["alpha".into()])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_by_name::<String>("name").unwrap(), "alpha");
        assert_eq!(rows[0].get_by_name::<f64>("score").unwrap(), 1.5);
    }

    #[test]
    fn duplicate_insert_is_constraint_error() {
        let mut conn = memory_with_table();
        conn.execute("INSERT INTO t (name) VALUES (?)", &["dup".into()])
            .unwrap();
        let err = conn
            .execute("INSERT INTO t (name) VALUES (?)", &["dup".into()])
            .unwrap_err();
        assert!(err.is_constraint());
    }

    #[test]
    fn query_scalar_reads_count() {
        let mut conn = memory_with_table();
        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn commit_closes_explicit_transaction() {
        let mut conn = memory_with_table();
        conn.begin().unwrap();
        conn.execute("INSERT INTO t (name) VALUES (?)", &["tx".into()])
            .unwrap();
        conn.commit().unwrap();
        // Autocommit again: a second commit is a no-op.
        conn.commit().unwrap();
        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn open_creates_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("store.sqlite3");
        let conn = SqliteConnection::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(conn.path(), Some(path.as_path()));
    }

    #[test]
    fn second_writer_sees_lock_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("locked.sqlite3");

        let mut holder = SqliteConnection::open(&path).unwrap();
        holder
            .execute_batch("CREATE TABLE t (name TEXT)")
            .unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let mut other = SqliteConnection::open(&path).unwrap();
        other.set_busy_timeout(Duration::from_millis(0)).unwrap();
        let err = other
            .execute("INSERT INTO t (name) VALUES (?)", &["x".into()])
            .unwrap_err();
        assert!(err.is_retryable_lock(), "unexpected error: {err}");

        holder.commit().unwrap();
    }
}
