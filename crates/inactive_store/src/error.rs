//! Error types for the store.

use std::path::PathBuf;

use inactive_db::BackendError;
use thiserror::Error;

/// Store operation result type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQL driver error that was not recovered locally
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// IO error (reading or writing the flat file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error while writing the flat file
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The flat file exists but does not have a shape the loader understands
    #[error("Malformed store file {}: {}", .path.display(), .reason)]
    MalformedStore { path: PathBuf, reason: String },

    /// Configured table name is not a plain SQL identifier
    #[error("Invalid table name: {0:?}")]
    InvalidTableName(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
