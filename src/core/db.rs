use crate::core::error::PoolError;
use crate::core::schemas;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Write connections wait longer than readers; reconciliation and batch
/// provisioning can queue several writers behind one another.
pub const WRITE_BUSY_TIMEOUT_SECS: u64 = 30;
pub const READ_BUSY_TIMEOUT_SECS: u64 = 15;

pub fn db_connect(db_path: &Path, busy_timeout_secs: u64) -> Result<Connection, PoolError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(busy_timeout_secs))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

pub fn pool_db_path(root: &Path) -> PathBuf {
    root.join(schemas::POOL_DB_NAME)
}

pub fn audit_log_path(root: &Path) -> PathBuf {
    root.join(schemas::BROKER_EVENTS_NAME)
}

/// Converts a stored integer flag into a bool.
pub fn flag(value: i64) -> bool {
    value != 0
}

/// `rusqlite` has no `u64` mapping; byte counts are stored as `i64`.
pub fn bytes_to_sql(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub fn bytes_from_sql(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub fn is_constraint_violation(err: &PoolError) -> bool {
    match err {
        PoolError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => {
            code.code == rusqlite::ErrorCode::ConstraintViolation
        }
        _ => false,
    }
}
