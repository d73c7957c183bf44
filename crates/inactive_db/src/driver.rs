//! The statement-level interface every SQL backend is driven through.

use crate::error::BackendError;
use crate::value::{DbRow, DbValue, FromDbValue};

/// Minimal statement interface shared by the embedded and remote drivers.
///
/// Parameters are positional (`?`) on both drivers.
pub trait SqlDriver {
    /// Human-readable driver name for logs.
    fn backend_name(&self) -> &'static str;

    /// Execute a statement, returning the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError>;

    /// Execute one or more statements without parameters.
    fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError>;

    /// Query and return all rows.
    fn query_all(&mut self, sql: &str, params: &[DbValue]) -> Result<Vec<DbRow>, BackendError>;

    /// Make pending writes durable.
    fn commit(&mut self) -> Result<(), BackendError>;

    /// Query and return the first row, if any.
    fn query_optional(
        &mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Option<DbRow>, BackendError> {
        let rows = self.query_all(sql, params)?;
        Ok(rows.into_iter().next())
    }

    /// Query and return a single scalar value.
    fn query_scalar<T: FromDbValue>(
        &mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError>
    where
        Self: Sized,
    {
        let row = self
            .query_optional(sql, params)?
            .ok_or_else(|| BackendError::Query("Expected one row, got none".to_string()))?;
        row.get(0)
    }
}

/// Check that `name` is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn validate_ident(name: &str) -> Result<(), BackendError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(BackendError::InvalidInput(format!(
            "Invalid SQL identifier: '{}'",
            name
        )))
    }
}

/// Quote an identifier with the given quote character, doubling embedded quotes.
pub fn quote_ident(name: &str, quote: char) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push(quote);
    for ch in name.chars() {
        if ch == quote {
            escaped.push(quote);
        }
        escaped.push(ch);
    }
    escaped.push(quote);
    escaped
}

pub(crate) fn sql_op_name(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("unknown")
}

pub(crate) fn hash_sql(sql: &str) -> String {
    // FNV-1a 64-bit hash for low-cardinality, stable identification.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in sql.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{:016x}", hash)
}
