//! Subsystem registration: every schema initializer in one table.
//!
//! Adding a new subsystem: append one entry to `SUBSYSTEMS`.

use crate::core::error::PoolError;
use crate::core::schemas;
use crate::core::store::Store;
use crate::pool::{accounts, file_index, projects};
use rusqlite::params;

pub(crate) struct SubsystemInit {
    pub name: &'static str,
    pub initialize_db: fn(&Store) -> Result<(), PoolError>,
}

/// Order matters: storage accounts reference projects.
pub(crate) const SUBSYSTEMS: &[SubsystemInit] = &[
    SubsystemInit { name: "meta", initialize_db: initialize_meta },
    SubsystemInit { name: "projects", initialize_db: projects::initialize_projects_db },
    SubsystemInit { name: "accounts", initialize_db: accounts::initialize_accounts_db },
    SubsystemInit { name: "file_index", initialize_db: file_index::initialize_file_index_db },
];

pub(crate) fn initialize_all(store: &Store) -> Result<(), PoolError> {
    for sub in SUBSYSTEMS {
        tracing::debug!(subsystem = sub.name, "initializing schema");
        (sub.initialize_db)(store)?;
    }
    Ok(())
}

fn initialize_meta(store: &Store) -> Result<(), PoolError> {
    store.broker().write("drivepool", "meta.init", |conn| {
        conn.execute_batch(schemas::POOL_DB_SCHEMA_META)?;
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES('schema_version', ?1)",
            params![schemas::POOL_SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    })
}
