//! Remote MySQL/MariaDB backend.
//!
//! Uniqueness is enforced on a SHA-256 digest of namespace and subject so
//! the constraint fits in an indexed `VARCHAR(64)` column. Lookups still
//! match on `file_path` and `subject`, since the digest of a bare
//! concatenation is not unique across namespaces.

use std::collections::BTreeSet;

use inactive_db::{quote_ident, validate_ident, BackendError, DbValue, MySqlDriver, SqlDriver};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::InactiveBackend;
use crate::error::{Result, StoreError};
use crate::schedule::RetestSchedule;

/// Server dialect. The two only differ in the integer type used for casts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFlavor {
    MySql,
    MariaDb,
}

impl RemoteFlavor {
    pub fn cast_type(self) -> &'static str {
        match self {
            RemoteFlavor::MySql => "UNSIGNED",
            RemoteFlavor::MariaDb => "INTEGER",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RemoteFlavor::MySql => "mysql",
            RemoteFlavor::MariaDb => "mariadb",
        }
    }
}

/// Hex SHA-256 of `namespace` immediately followed by `subject`.
pub fn subject_digest(namespace: &str, subject: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(subject.as_bytes());
    hex::encode(hasher.finalize())
}

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
    fn new(table: &str, flavor: RemoteFlavor) -> Self {
        let t = quote_ident(table, '`');
        let cast = flavor.cast_type();
        let retest_cmp = |op: &str| {
            format!(
                "SELECT subject FROM {t} WHERE file_path = ? \
                 AND CAST(UNIX_TIMESTAMP() AS {cast}) \
                 {op} (CAST(UNIX_TIMESTAMP(modified) AS {cast}) + CAST(? AS {cast})) \
                 ORDER BY subject"
            )
        };

        Self {
            schema: format!(
                "CREATE TABLE IF NOT EXISTS {t} (
                    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    file_path LONGTEXT NOT NULL,
                    subject LONGTEXT NOT NULL,
                    status TEXT,
                    created DATETIME DEFAULT CURRENT_TIMESTAMP,
                    modified DATETIME DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                    digest VARCHAR(64) NOT NULL UNIQUE
                ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4"
            ),
            count: format!("SELECT COUNT(*) FROM {t} WHERE file_path = ? AND subject = ?"),
            insert: format!(
                "INSERT INTO {t} (file_path, subject, status, digest) VALUES (?, ?, ?, ?)"
            ),
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

/// MySQL or MariaDB store for one namespace.
#[derive(Debug)]
pub struct MySqlBackend {
    driver: MySqlDriver,
    namespace: String,
    schedule: RetestSchedule,
    flavor: RemoteFlavor,
    queries: Queries,
}

impl MySqlBackend {
    pub fn new(
        driver: MySqlDriver,
        namespace: impl Into<String>,
        table: &str,
        schedule: RetestSchedule,
        flavor: RemoteFlavor,
    ) -> Result<Self> {
        validate_ident(table).map_err(|_| StoreError::InvalidTableName(table.to_string()))?;
        Ok(Self {
            driver,
            namespace: namespace.into(),
            schedule,
            flavor,
            queries: Queries::new(table, flavor),
        })
    }

    /// Connect a pool and build the backend.
    pub fn connect(
        url: &str,
        max_connections: u32,
        namespace: impl Into<String>,
        table: &str,
        schedule: RetestSchedule,
        flavor: RemoteFlavor,
    ) -> Result<Self> {
        let driver = MySqlDriver::connect(url, max_connections)?;
        Self::new(driver, namespace, table, schedule, flavor)
    }

    pub fn flavor(&self) -> RemoteFlavor {
        self.flavor
    }

    fn digest(&self, subject: &str) -> String {
        subject_digest(&self.namespace, subject)
    }

    fn key_params(&self, subject: &str) -> [DbValue; 2] {
        [DbValue::from(self.namespace.as_str()), DbValue::from(subject)]
    }

    fn subjects(&self, sql: &str) -> Result<BTreeSet<String>> {
        let params = [
            DbValue::from(self.namespace.as_str()),
            DbValue::Integer(self.schedule.interval_secs()),
        ];
        let rows = self
            .driver
            .with_connection(|session| session.query_all(sql, &params))?;
        let mut subjects = BTreeSet::new();
        for row in rows {
            subjects.insert(row.get_by_name::<String>("subject")?);
        }
        Ok(subjects)
    }
}

impl InactiveBackend for MySqlBackend {
    fn name(&self) -> &'static str {
        self.flavor.name()
    }

    fn initiate(&mut self) -> Result<()> {
        let schema = &self.queries.schema;
        self.driver
            .with_connection(|session| session.execute_batch(schema))?;
        info!(namespace = %self.namespace, flavor = self.flavor.name(), "Remote store ready");
        Ok(())
    }

    fn contains(&mut self, subject: &str) -> Result<bool> {
        let params = self.key_params(subject);
        let count: i64 = self
            .driver
            .with_connection(|session| session.query_scalar(&self.queries.count, &params))?;
        Ok(count != 0)
    }

    fn add(&mut self, subject: &str, status: &str) -> Result<()> {
        let digest = self.digest(subject);
        let namespace = self.namespace.as_str();
        let queries = &self.queries;

        self.driver.with_connection(|session| {
            let inserted = session.execute(
                &queries.insert,
                &[
                    DbValue::from(namespace),
                    DbValue::from(subject),
                    DbValue::from(status),
                    DbValue::from(digest.as_str()),
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(err) if err.is_constraint() => {
                    debug!(namespace, subject, "Subject exists, updating status");
                    let updated = session.execute(
                        &queries.update,
                        &[
                            DbValue::from(status),
                            DbValue::from(namespace),
                            DbValue::from(subject),
                        ],
                    )?;
                    ensure_updated(updated, namespace, subject, &err)?;
                }
                Err(err) => return Err(err),
            }
            session.commit()
        })?;

        debug!(namespace, subject, status, "Added subject");
        Ok(())
    }

    fn remove(&mut self, subject: &str) -> Result<()> {
        let params = self.key_params(subject);
        let removed = self.driver.with_connection(|session| {
            let removed = session.execute(&self.queries.delete, &params)?;
            session.commit()?;
            Ok(removed)
        })?;
        debug!(namespace = %self.namespace, subject, removed, "Removed subject");
        Ok(())
    }

    fn due_for_retest(&mut self) -> Result<BTreeSet<String>> {
        self.subjects(&self.queries.due)
    }

    fn already_tested(&mut self) -> Result<BTreeSet<String>> {
        self.subjects(&self.queries.tested)
    }
}

/// A unique violation whose update matched nothing means the digest is held
/// by another namespace's row; report it instead of dropping the record.
fn ensure_updated(
    updated: u64,
    namespace: &str,
    subject: &str,
    insert_err: &BackendError,
) -> std::result::Result<(), BackendError> {
    if updated > 0 {
        return Ok(());
    }
    Err(BackendError::Constraint(format!(
        "digest of '{}' in '{}' collides with another record: {}",
        subject, namespace, insert_err
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_sha256_of_concatenation() {
        assert_eq!(
            subject_digest("", ""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            subject_digest("ab", "c"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(subject_digest("ab", "c"), subject_digest("a", "bc"));
    }

    #[test]
    fn flavors_cast_differently() {
        let mysql = Queries::new("inactive", RemoteFlavor::MySql);
        let maria = Queries::new("inactive", RemoteFlavor::MariaDb);

        assert!(mysql.due.contains("CAST(UNIX_TIMESTAMP() AS UNSIGNED)"));
        assert!(maria.due.contains("CAST(UNIX_TIMESTAMP() AS INTEGER)"));
        assert!(!maria.tested.contains("UNSIGNED"));
    }

    #[test]
    fn retest_predicates_are_strict_and_opposite() {
        let queries = Queries::new("inactive", RemoteFlavor::MySql);
        assert!(queries.due.contains(") > (CAST(UNIX_TIMESTAMP(modified)"));
        assert!(queries.tested.contains(") < (CAST(UNIX_TIMESTAMP(modified)"));
    }

    #[test]
    fn table_name_is_backtick_quoted() {
        let queries = Queries::new("pyf_inactive", RemoteFlavor::MariaDb);
        assert!(queries.schema.contains("CREATE TABLE IF NOT EXISTS `pyf_inactive`"));
        assert!(queries.schema.contains("digest VARCHAR(64) NOT NULL UNIQUE"));
        assert!(queries.count.starts_with("SELECT COUNT(*) FROM `pyf_inactive`"));
    }

    #[test]
    fn lookups_match_namespace_and_subject() {
        let queries = Queries::new("inactive", RemoteFlavor::MySql);
        for sql in [&queries.count, &queries.update, &queries.delete] {
            assert!(sql.contains("WHERE file_path = ? AND subject = ?"), "{sql}");
            assert!(!sql.contains("digest"), "{sql}");
        }
    }

    #[test]
    fn status_column_is_not_width_limited() {
        let queries = Queries::new("inactive", RemoteFlavor::MariaDb);
        assert!(queries.schema.contains("status TEXT,"));
        assert!(!queries.schema.contains("VARCHAR(12)"));
    }

    #[test]
    fn fallback_update_must_touch_a_row() {
        let insert_err = BackendError::Constraint("Duplicate entry".to_string());
        assert!(ensure_updated(1, "a", "bc", &insert_err).is_ok());

        let err = ensure_updated(0, "a", "bc", &insert_err).unwrap_err();
        assert!(err.is_constraint());
        assert!(err.to_string().contains("'bc' in 'a'"));
    }

    #[test]
    fn update_refreshes_modified() {
        let queries = Queries::new("inactive", RemoteFlavor::MySql);
        assert!(queries.update.contains("modified = CURRENT_TIMESTAMP"));
    }
}
