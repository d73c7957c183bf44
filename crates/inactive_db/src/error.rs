//! Error types for the driver layer.

use thiserror::Error;

/// Errors from database backend operations.
///
/// Driver errors are classified when they are converted, so callers can ask
/// [`BackendError::is_retryable_lock`] or [`BackendError::is_constraint`]
/// without knowing which driver produced them.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database is locked: {0}")]
    Locked(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backend not available: {0}")]
    NotAvailable(String),
}

impl BackendError {
    /// Lock contention that may clear up on its own (SQLITE_BUSY, lock wait timeout, ...).
    pub fn is_retryable_lock(&self) -> bool {
        matches!(self, BackendError::Locked(_))
    }

    /// Uniqueness or other integrity constraint failure.
    pub fn is_constraint(&self) -> bool {
        matches!(self, BackendError::Constraint(_))
    }
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    BackendError::Locked(err.to_string())
                }
                ErrorCode::ConstraintViolation => BackendError::Constraint(err.to_string()),
                _ => BackendError::Database(err.to_string()),
            },
            rusqlite::Error::InvalidColumnType(..) | rusqlite::Error::FromSqlConversionFailure(..) => {
                BackendError::TypeConversion(err.to_string())
            }
            _ => BackendError::Database(err.to_string()),
        }
    }
}

// MySQL/MariaDB server codes for lock wait timeout and deadlock.
const MYSQL_LOCK_CODES: &[u16] = &[1205, 1213];

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match &err {
            sqlx::Error::Database(db_err) => match db_err.kind() {
                ErrorKind::UniqueViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::NotNullViolation
                | ErrorKind::CheckViolation => BackendError::Constraint(err.to_string()),
                _ => {
                    let is_lock = db_err
                        .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                        .map(|e| MYSQL_LOCK_CODES.contains(&e.number()))
                        .unwrap_or(false);
                    if is_lock {
                        BackendError::Locked(err.to_string())
                    } else {
                        BackendError::Database(err.to_string())
                    }
                }
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                BackendError::NotAvailable(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                BackendError::TypeConversion(err.to_string())
            }
            _ => BackendError::Database(err.to_string()),
        }
    }
}
