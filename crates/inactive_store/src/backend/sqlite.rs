//! Embedded SQLite backend.
//!
//! Retest predicates are evaluated by SQLite against the `modified` column
//! using `strftime('%s', ...)`. A statement that fails because another
//! process holds the database lock is retried once after a fixed delay.

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use inactive_db::{quote_ident, validate_ident, BackendError, DbValue, SqlDriver, SqliteConnection};
use tracing::{debug, info, warn};

use super::InactiveBackend;
use crate::error::{Result, StoreError};
use crate::schedule::RetestSchedule;

/// SQL text for one table, built once at construction.
#[derive(Debug, Clone)]
struct Queries {
    schema: String,
    count: String,
    insert: String,
    update: String,
    delete: String,
    due: String,
    tested: String,
}

impl Queries {
    fn new(table: &str) -> Self {
        let t = quote_ident(table, '"');
        let retest_cmp = |op: &str| {
            format!(
                "SELECT subject FROM {t} WHERE file_path = ? \
                 AND CAST(strftime('%s', 'now') AS INTEGER) \
                 {op} (CAST(strftime('%s', modified) AS INTEGER) + CAST(? AS INTEGER)) \
                 ORDER BY subject"
            )
        };

        Self {
            schema: format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    file_path TEXT NOT NULL,
                    subject TEXT NOT NULL,
                    status TEXT,
                    created TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    modified TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    UNIQUE(file_path, subject)
                )"
            ),
            count: format!("SELECT COUNT(*) FROM {t} WHERE subject = ? AND file_path = ?"),
            insert: format!("INSERT INTO {t} (file_path, subject, status) VALUES (?, ?, ?)"),
            update: format!(
                "UPDATE {t} SET status = ?, modified = CURRENT_TIMESTAMP \
                 WHERE file_path = ? AND subject = ?"
            ),
            delete: format!("DELETE FROM {t} WHERE file_path = ? AND subject = ?"),
            due: retest_cmp(">"),
            tested: retest_cmp("<"),
        }
    }
}

/// SQLite-backed store for one namespace.
///
/// Generic over the driver so lock contention can be simulated in tests.
pub struct SqliteBackend<D: SqlDriver = SqliteConnection> {
    driver: D,
    namespace: String,
    schedule: RetestSchedule,
    lock_retry_delay: Duration,
    queries: Queries,
}

impl<D: SqlDriver> std::fmt::Debug for SqliteBackend<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("driver", &self.driver.backend_name())
            .field("namespace", &self.namespace)
            .field("schedule", &self.schedule)
            .finish()
    }
}

impl<D: SqlDriver> SqliteBackend<D> {
    pub fn new(
        driver: D,
        namespace: impl Into<String>,
        table: &str,
        schedule: RetestSchedule,
        lock_retry_delay: Duration,
    ) -> Result<Self> {
        validate_ident(table).map_err(|_| StoreError::InvalidTableName(table.to_string()))?;
        Ok(Self {
            driver,
            namespace: namespace.into(),
            schedule,
            lock_retry_delay,
            queries: Queries::new(table),
        })
    }

    /// Run `op`, retrying exactly once if the database reports a lock.
    fn with_lock_retry<T, F>(&mut self, mut op: F) -> std::result::Result<T, BackendError>
    where
        F: FnMut(&mut D) -> std::result::Result<T, BackendError>,
    {
        match op(&mut self.driver) {
            Err(err) if err.is_retryable_lock() => {
                warn!(
                    namespace = %self.namespace,
                    delay_ms = self.lock_retry_delay.as_millis() as u64,
                    error = %err,
                    "Database locked, retrying once"
                );
                thread::sleep(self.lock_retry_delay);
                op(&mut self.driver)
            }
            other => other,
        }
    }

    fn execute(&mut self, sql: &str, params: &[DbValue]) -> std::result::Result<u64, BackendError> {
        self.with_lock_retry(|driver| driver.execute(sql, params))
    }

    fn commit(&mut self) -> std::result::Result<(), BackendError> {
        self.with_lock_retry(|driver| driver.commit())
    }

    fn subjects(&mut self, sql: &str) -> Result<BTreeSet<String>> {
        let params = [
            DbValue::from(self.namespace.as_str()),
            DbValue::Integer(self.schedule.interval_secs()),
        ];
        let rows = self.with_lock_retry(|driver| driver.query_all(sql, &params))?;
        let mut subjects = BTreeSet::new();
        for row in rows {
            subjects.insert(row.get_by_name::<String>("subject")?);
        }
        Ok(subjects)
    }
}

impl<D: SqlDriver + Send> InactiveBackend for SqliteBackend<D> {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn initiate(&mut self) -> Result<()> {
        let schema = self.queries.schema.clone();
        self.with_lock_retry(|driver| driver.execute_batch(&schema))?;
        info!(namespace = %self.namespace, driver = self.driver.backend_name(), "SQLite store ready");
        Ok(())
    }

    fn contains(&mut self, subject: &str) -> Result<bool> {
        let sql = self.queries.count.clone();
        let params = [DbValue::from(subject), DbValue::from(self.namespace.as_str())];
        let rows = self.with_lock_retry(|driver| driver.query_all(&sql, &params))?;
        let count = match rows.first() {
            Some(row) => row.get::<i64>(0)?,
            None => 0,
        };
        Ok(count != 0)
    }

    fn add(&mut self, subject: &str, status: &str) -> Result<()> {
        let insert = self.queries.insert.clone();
        let params = [
            DbValue::from(self.namespace.as_str()),
            DbValue::from(subject),
            DbValue::from(status),
        ];

        match self.execute(&insert, &params) {
            Ok(_) => {}
            Err(err) if err.is_constraint() => {
                debug!(namespace = %self.namespace, subject, "Subject exists, updating status");
                let update = self.queries.update.clone();
                self.execute(
                    &update,
                    &[
                        DbValue::from(status),
                        DbValue::from(self.namespace.as_str()),
                        DbValue::from(subject),
                    ],
                )?;
            }
            Err(err) => return Err(err.into()),
        }

        self.commit()?;
        debug!(namespace = %self.namespace, subject, status, "Added subject");
        Ok(())
    }

    fn remove(&mut self, subject: &str) -> Result<()> {
        let delete = self.queries.delete.clone();
        let params = [DbValue::from(self.namespace.as_str()), DbValue::from(subject)];
        let removed = self.execute(&delete, &params)?;
        self.commit()?;
        debug!(namespace = %self.namespace, subject, removed, "Removed subject");
        Ok(())
    }

    fn due_for_retest(&mut self) -> Result<BTreeSet<String>> {
        let sql = self.queries.due.clone();
        self.subjects(&sql)
    }

    fn already_tested(&mut self) -> Result<BTreeSet<String>> {
        let sql = self.queries.tested.clone();
        self.subjects(&sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inactive_db::DbRow;

    /// Wraps a real connection and reports `locked` for the first
    /// `failures` statements that start with `prefix`.
    struct FlakyDriver {
        inner: SqliteConnection,
        prefix: &'static str,
        failures: usize,
        attempts: usize,
    }

    impl FlakyDriver {
        fn trip(&mut self, sql: &str) -> std::result::Result<(), BackendError> {
            if sql.trim_start().starts_with(self.prefix) {
                self.attempts += 1;
                if self.failures > 0 {
                    self.failures -= 1;
                    return Err(BackendError::Locked("database is locked".to_string()));
                }
            }
            Ok(())
        }
    }

    impl SqlDriver for FlakyDriver {
        fn backend_name(&self) -> &'static str {
            "flaky"
        }

        fn execute(&mut self, sql: &str, params: &[DbValue]) -> std::result::Result<u64, BackendError> {
            self.trip(sql)?;
            self.inner.execute(sql, params)
        }

        fn execute_batch(&mut self, sql: &str) -> std::result::Result<(), BackendError> {
            self.inner.execute_batch(sql)
        }

        fn query_all(
            &mut self,
            sql: &str,
            params: &[DbValue],
        ) -> std::result::Result<Vec<DbRow>, BackendError> {
            self.trip(sql)?;
            self.inner.query_all(sql, params)
        }

        fn commit(&mut self) -> std::result::Result<(), BackendError> {
            self.inner.commit()
        }
    }

    fn backend(interval: i64) -> SqliteBackend {
        let mut backend = SqliteBackend::new(
            SqliteConnection::open_in_memory().unwrap(),
            "list.txt",
            "inactive",
            RetestSchedule::new(interval),
            Duration::from_millis(1),
        )
        .unwrap();
        backend.initiate().unwrap();
        backend
    }

    fn flaky_backend(prefix: &'static str, failures: usize) -> SqliteBackend<FlakyDriver> {
        let driver = FlakyDriver {
            inner: SqliteConnection::open_in_memory().unwrap(),
            prefix,
            failures,
            attempts: 0,
        };
        let mut backend = SqliteBackend::new(
            driver,
            "list.txt",
            "inactive",
            RetestSchedule::new(86_400),
            Duration::from_millis(1),
        )
        .unwrap();
        backend.initiate().unwrap();
        backend
    }

    fn backdate(backend: &mut SqliteBackend, subject: &str, modifier: &str) {
        backend
            .driver
            .execute(
                "UPDATE inactive SET modified = datetime('now', ?) WHERE subject = ?",
                &[DbValue::from(modifier), DbValue::from(subject)],
            )
            .unwrap();
    }

    #[test]
    fn add_then_contains() {
        let mut backend = backend(86_400);
        assert!(!backend.contains("a.example").unwrap());
        backend.add("a.example", "INACTIVE").unwrap();
        assert!(backend.contains("a.example").unwrap());
    }

    #[test]
    fn add_twice_updates_status() {
        let mut backend = backend(86_400);
        backend.add("a.example", "INACTIVE").unwrap();
        backend.add("a.example", "INVALID").unwrap();

        let rows = backend
            .driver
            .query_all(
                "SELECT status FROM inactive WHERE subject = ?",
                &[DbValue::from("a.example")],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<String>(0).unwrap(), "INVALID");
    }

    #[test]
    fn remove_deletes_row() {
        let mut backend = backend(86_400);
        backend.add("a.example", "INACTIVE").unwrap();
        backend.remove("a.example").unwrap();
        assert!(!backend.contains("a.example").unwrap());
        // Removing an absent subject is fine.
        backend.remove("a.example").unwrap();
    }

    #[test]
    fn namespaces_are_isolated() {
        let mut backend = backend(86_400);
        backend.add("a.example", "INACTIVE").unwrap();
        backend.namespace = "other.txt".to_string();
        assert!(!backend.contains("a.example").unwrap());
        assert!(backend.already_tested().unwrap().is_empty());
    }

    #[test]
    fn retest_sets_use_modified_column() {
        let mut backend = backend(86_400);
        backend.add("fresh.example", "INACTIVE").unwrap();
        backend.add("stale.example", "INACTIVE").unwrap();
        backdate(&mut backend, "stale.example", "-2 days");

        let due = backend.due_for_retest().unwrap();
        let tested = backend.already_tested().unwrap();
        assert_eq!(due, BTreeSet::from(["stale.example".to_string()]));
        assert_eq!(tested, BTreeSet::from(["fresh.example".to_string()]));
    }

    #[test]
    fn re_adding_refreshes_modified() {
        let mut backend = backend(86_400);
        backend.add("a.example", "INACTIVE").unwrap();
        backdate(&mut backend, "a.example", "-2 days");
        assert!(backend.due_for_retest().unwrap().contains("a.example"));

        backend.add("a.example", "INACTIVE").unwrap();
        assert!(backend.due_for_retest().unwrap().is_empty());
        assert!(backend.already_tested().unwrap().contains("a.example"));
    }

    #[test]
    fn empty_namespace_lists_are_empty() {
        let mut backend = backend(86_400);
        assert!(backend.due_for_retest().unwrap().is_empty());
        assert!(backend.already_tested().unwrap().is_empty());
    }

    #[test]
    fn single_lock_failure_is_retried() {
        let mut backend = flaky_backend("INSERT", 1);
        backend.add("a.example", "INACTIVE").unwrap();
        assert_eq!(backend.driver.attempts, 2);
        assert!(backend.contains("a.example").unwrap());
    }

    #[test]
    fn double_lock_failure_is_fatal() {
        let mut backend = flaky_backend("INSERT", 2);
        let err = backend.add("a.example", "INACTIVE").unwrap_err();
        assert!(matches!(
            err,
            crate::StoreError::Backend(BackendError::Locked(_))
        ));
        assert_eq!(backend.driver.attempts, 2);
        assert!(!backend.contains("a.example").unwrap());
    }

    #[test]
    fn lock_retry_applies_to_reads() {
        let mut backend = flaky_backend("SELECT", 1);
        assert!(!backend.contains("a.example").unwrap());
        assert_eq!(backend.driver.attempts, 2);
    }

    #[test]
    fn invalid_table_name_is_rejected() {
        let result = SqliteBackend::new(
            SqliteConnection::open_in_memory().unwrap(),
            "list.txt",
            "inactive\"; DROP TABLE x; --",
            RetestSchedule::new(1),
            Duration::ZERO,
        );
        assert!(result.is_err());
    }
}
