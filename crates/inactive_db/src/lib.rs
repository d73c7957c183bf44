//! SQL driver shim for the inactive-subject store.
//!
//! The store only ever talks to a database through the [`SqlDriver`] trait:
//! run a statement, fetch rows, commit. Everything vendor-specific (value
//! conversion, error classification, connection checkout) lives here.
//!
//! # Usage
//!
//! ```rust,ignore
//! use inactive_db::{DbValue, SqlDriver, SqliteConnection};
//!
//! let mut conn = SqliteConnection::open("inactive.sqlite3")?;
//! conn.execute("DELETE FROM inactive WHERE subject = ?", &[DbValue::from("example.org")])?;
//! conn.commit()?;
//! ```

mod driver;
mod error;
mod mysql;
mod sqlite;
mod value;

pub use driver::{quote_ident, validate_ident, SqlDriver};
pub use error::BackendError;
pub use mysql::{MySqlDriver, MySqlSession};
pub use sqlite::SqliteConnection;
pub use value::{DbRow, DbValue, FromDbValue};
