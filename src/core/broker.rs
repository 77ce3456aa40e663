use crate::core::db;
use crate::core::error::PoolError;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// The DB Broker is the "Thin Waist" for state access.
///
/// Reads open a fresh connection and run concurrently (WAL). Writes are
/// serialized through a per-store mutex and audited to `broker.events.jsonl`.
/// The broker is owned by a [`crate::core::store::Store`]; there is no global
/// instance.
pub struct DbBroker {
    db_path: PathBuf,
    audit_log_path: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            db_path: db::pool_db_path(root),
            audit_log_path: db::audit_log_path(root),
            write_lock: Mutex::new(()),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Execute a closure with a read connection (no write serialization).
    pub fn read<F, R>(&self, op: &str, f: F) -> Result<R, PoolError>
    where
        F: FnOnce(&Connection) -> Result<R, PoolError>,
    {
        let conn = db::db_connect(&self.db_path, db::READ_BUSY_TIMEOUT_SECS)?;
        tracing::trace!(op, "broker read");
        f(&conn)
    }

    /// Execute a closure with a serialized write connection.
    pub fn write<F, R>(&self, actor: &str, op: &str, f: F) -> Result<R, PoolError>
    where
        F: FnOnce(&Connection) -> Result<R, PoolError>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| PoolError::Validation("Broker write lock poisoned".to_string()))?;
        let conn = db::db_connect(&self.db_path, db::WRITE_BUSY_TIMEOUT_SECS)?;

        let result = f(&conn);
        self.record(actor, op, result.is_ok());
        result
    }

    /// Execute a closure inside one SQLite transaction. The transaction
    /// commits when the closure returns `Ok` and rolls back otherwise.
    pub fn transaction<F, R>(&self, actor: &str, op: &str, f: F) -> Result<R, PoolError>
    where
        F: FnOnce(&Connection) -> Result<R, PoolError>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| PoolError::Validation("Broker write lock poisoned".to_string()))?;
        let mut conn = db::db_connect(&self.db_path, db::WRITE_BUSY_TIMEOUT_SECS)?;

        let result = {
            let tx = conn.transaction()?;
            match f(&tx) {
                Ok(value) => tx.commit().map(|_| value).map_err(PoolError::from),
                // Dropping the transaction rolls it back.
                Err(e) => Err(e),
            }
        };
        self.record(actor, op, result.is_ok());
        result
    }

    fn record(&self, actor: &str, op: &str, ok: bool) {
        let status = if ok { "success" } else { "error" };
        if let Err(e) = self.log_event(actor, op, status) {
            tracing::warn!(op, error = %e, "failed to append broker audit event");
        }
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) -> Result<(), PoolError> {
        let db_id = self
            .db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id,
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }

    /// Read back the audit log, newest last.
    pub fn audit_events(&self) -> Result<Vec<BrokerEvent>, PoolError> {
        if !self.audit_log_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.audit_log_path)?;
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(PoolError::from))
            .collect()
    }
}
