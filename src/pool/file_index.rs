//! Derived file index.
//!
//! Entries mirror the files stored in each account so listings do not hit the
//! provider. The table is disposable: project deletion and reconciliation
//! purge it, and [`DriveFileIndexer`] rebuilds it one account at a time.

use crate::core::db::{bytes_from_sql, bytes_to_sql};
use crate::core::error::PoolError;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time::{self, Clock};
use crate::google::CloudStorage;
use crate::pool::accounts::StorageAccount;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIndexEntry {
    pub id: String,
    pub file_id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub account_id: String,
    pub owner: String,
    pub project_id: String,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
    pub sync_time: String,
}

/// Rebuilds index entries for an account. Runs in the background after
/// reconciliation.
pub trait FileReindexer: Send + Sync {
    /// Returns the number of entries written.
    fn reindex_account(&self, account: &StorageAccount) -> Result<usize, PoolError>;
}

pub(crate) fn insert_entry(conn: &Connection, entry: &FileIndexEntry) -> Result<(), PoolError> {
    conn.execute(
        "INSERT INTO file_index (id, file_id, name, size, mime_type, account_id, owner, project_id,
             created_time, modified_time, sync_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            entry.id,
            entry.file_id,
            entry.name,
            bytes_to_sql(entry.size),
            entry.mime_type,
            entry.account_id,
            entry.owner,
            entry.project_id,
            entry.created_time,
            entry.modified_time,
            entry.sync_time,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_by_project(conn: &Connection, project_id: &str) -> Result<usize, PoolError> {
    Ok(conn.execute(
        "DELETE FROM file_index WHERE project_id = ?1",
        params![project_id],
    )?)
}

pub(crate) fn delete_by_account(conn: &Connection, account_id: &str) -> Result<usize, PoolError> {
    Ok(conn.execute(
        "DELETE FROM file_index WHERE account_id = ?1",
        params![account_id],
    )?)
}

pub(crate) fn delete_by_file(conn: &Connection, account_id: &str, file_id: &str) -> Result<usize, PoolError> {
    Ok(conn.execute(
        "DELETE FROM file_index WHERE account_id = ?1 AND file_id = ?2",
        params![account_id, file_id],
    )?)
}

pub fn insert_entries(store: &Store, entries: &[FileIndexEntry]) -> Result<(), PoolError> {
    store
        .broker()
        .transaction("drivepool", "file_index.insert", |conn| {
            for entry in entries {
                insert_entry(conn, entry)?;
            }
            Ok(())
        })
}

pub fn list_for_account(store: &Store, account_id: &str) -> Result<Vec<FileIndexEntry>, PoolError> {
    store.broker().read("file_index.list_for_account", |conn| {
        let mut stmt = conn.prepare(
            "SELECT id, file_id, name, size, mime_type, account_id, owner, project_id,
                    created_time, modified_time, sync_time
             FROM file_index WHERE account_id = ?1 ORDER BY name, file_id",
        )?;
        let entries = stmt
            .query_map(params![account_id], |row| {
                Ok(FileIndexEntry {
                    id: row.get(0)?,
                    file_id: row.get(1)?,
                    name: row.get(2)?,
                    size: bytes_from_sql(row.get(3)?),
                    mime_type: row.get(4)?,
                    account_id: row.get(5)?,
                    owner: row.get(6)?,
                    project_id: row.get(7)?,
                    created_time: row.get(8)?,
                    modified_time: row.get(9)?,
                    sync_time: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    })
}

pub fn count_for_project(store: &Store, project_id: &str) -> Result<u64, PoolError> {
    store.broker().read("file_index.count_for_project", |conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM file_index WHERE project_id = ?1",
            params![project_id],
            |r| r.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    })
}

/// Pages through an account's files at the provider and replaces that
/// account's entries in one transaction.
pub struct DriveFileIndexer {
    store: Arc<Store>,
    storage: Arc<dyn CloudStorage>,
    clock: Arc<dyn Clock>,
    page_size: u32,
}

impl DriveFileIndexer {
    pub fn new(store: Arc<Store>, storage: Arc<dyn CloudStorage>, clock: Arc<dyn Clock>, page_size: u32) -> Self {
        Self {
            store,
            storage,
            clock,
            page_size: page_size.max(1),
        }
    }
}

impl FileReindexer for DriveFileIndexer {
    fn reindex_account(&self, account: &StorageAccount) -> Result<usize, PoolError> {
        let credential = account.credential()?;
        let sync_time = time::epoch_z(self.clock.now_epoch_secs());
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .storage
                .list_files(credential, page_token.as_deref(), self.page_size)
                .map_err(PoolError::FileListFailed)?;
            entries.extend(page.files.into_iter().map(|file| FileIndexEntry {
                id: time::new_record_id("F"),
                file_id: file.id,
                name: file.name,
                size: file.size,
                mime_type: file.mime_type,
                account_id: account.id.clone(),
                owner: account.owner.clone(),
                project_id: account.project_id.clone(),
                created_time: file.created_time,
                modified_time: file.modified_time,
                sync_time: sync_time.clone(),
            }));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let written = entries.len();
        self.store
            .broker()
            .transaction("drivepool", "file_index.reindex_account", |conn| {
                delete_by_account(conn, &account.id)?;
                for entry in &entries {
                    insert_entry(conn, entry)?;
                }
                Ok(())
            })?;
        tracing::info!(account = %account.id, files = written, "account reindexed");
        Ok(written)
    }
}

pub fn initialize_file_index_db(store: &Store) -> Result<(), PoolError> {
    store.broker().write("drivepool", "file_index.init", |conn| {
        conn.execute_batch(schemas::FILE_INDEX_SCHEMA)?;
        conn.execute_batch(schemas::FILE_INDEX_INDEX_PROJECT)?;
        conn.execute_batch(schemas::FILE_INDEX_INDEX_ACCOUNT)?;
        conn.execute_batch(schemas::FILE_INDEX_INDEX_FILE)?;
        Ok(())
    })
}
