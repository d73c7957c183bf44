//! Backend capability trait and its three implementations.

use std::collections::BTreeSet;

use crate::error::Result;

pub mod file;
pub mod mysql;
pub mod sqlite;

pub use file::FileBucketBackend;
pub use mysql::{subject_digest, MySqlBackend, RemoteFlavor};
pub use sqlite::SqliteBackend;

/// Everything the store facade needs from a persistence backend.
///
/// Every implementation is scoped to one namespace fixed at construction.
pub trait InactiveBackend: Send {
    /// Short backend name for logs ("json", "sqlite", ...).
    fn name(&self) -> &'static str;

    /// Load persisted state (flat file) or ensure the schema exists (SQL).
    fn initiate(&mut self) -> Result<()>;

    /// Re-read persisted state into memory. SQL backends hold no state.
    fn load(&mut self) -> Result<()> {
        Ok(())
    }

    /// Persist in-memory state. SQL backends are always persisted.
    fn save(&mut self) -> Result<()> {
        Ok(())
    }

    fn contains(&mut self, subject: &str) -> Result<bool>;

    /// Record `subject` with `status`, replacing any earlier record.
    fn add(&mut self, subject: &str, status: &str) -> Result<()>;

    /// Forget every record of `subject`.
    fn remove(&mut self, subject: &str) -> Result<()>;

    /// Subjects last tested more than one retest interval ago.
    fn due_for_retest(&mut self) -> Result<BTreeSet<String>>;

    /// Subjects tested within the retest interval.
    fn already_tested(&mut self) -> Result<BTreeSet<String>>;
}
