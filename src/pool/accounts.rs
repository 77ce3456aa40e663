//! Account registry and quota cache.
//!
//! Storage accounts are the quota-limited shards the pool writes into. The
//! registry owns their rows in `storage_accounts`, including the cached quota
//! columns. The cache is refreshed on demand from the provider and adjusted
//! optimistically after writes; it may lag the provider between refreshes.

use crate::core::db::{self, bytes_from_sql, bytes_to_sql, flag};
use crate::core::error::PoolError;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time::{self, Clock};
use crate::google::{CloudStorage, Credential, Quota};
use crate::pool::file_index;
use crate::pool::projects::Project;
use crate::pool::worker_pool;
use rayon::prelude::*;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// The project's IAM-capable account, created with the project.
    Admin,
    /// A shard minted by the provisioner or the reconciler.
    Automated,
    /// Admin account re-derived from a project's embedded credential.
    LegacyAdmin,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Admin => "admin",
            AccountKind::Automated => "automated",
            AccountKind::LegacyAdmin => "legacy_admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(AccountKind::Admin),
            "automated" => Some(AccountKind::Automated),
            "legacy_admin" => Some(AccountKind::LegacyAdmin),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, AccountKind::Admin | AccountKind::LegacyAdmin)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageAccount {
    pub id: String,
    pub project_id: String,
    pub owner: String,
    pub name: String,
    pub description: String,
    pub kind: AccountKind,
    pub identity_email: String,
    pub identity_id: String,
    /// `None` when loaded for listing without credentials.
    #[serde(skip)]
    pub credential: Option<Credential>,
    pub usage_bytes: u64,
    pub limit_bytes: u64,
    pub available_bytes: u64,
    pub quota_updated_at: Option<String>,
    pub disabled: bool,
    pub created_at: String,
}

impl StorageAccount {
    pub fn credential(&self) -> Result<&Credential, PoolError> {
        self.credential.as_ref().ok_or_else(|| {
            PoolError::Validation(format!("Account '{}' was loaded without its credential", self.id))
        })
    }

    pub fn apply_quota(&mut self, quota: Quota, at: String) {
        self.limit_bytes = quota.limit;
        self.usage_bytes = quota.usage;
        self.available_bytes = quota.available();
        self.quota_updated_at = Some(at);
    }

    /// Authoritative-formula check, independent of the cached `available` column.
    pub fn has_room_for(&self, size_bytes: u64) -> bool {
        self.limit_bytes.saturating_sub(self.usage_bytes) > size_bytes
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountPage {
    pub accounts: Vec<StorageAccount>,
    pub page: u32,
    pub size: u32,
    pub has_more: bool,
}

#[derive(Debug)]
pub struct RefreshFailure {
    pub account_id: String,
    pub error: PoolError,
}

/// Outcome of a bulk refresh. Failures are isolated per account.
#[derive(Debug, Default)]
pub struct RefreshReport {
    pub refreshed: Vec<StorageAccount>,
    pub failures: Vec<RefreshFailure>,
}

impl RefreshReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

const ACCOUNT_COLUMNS: &str = "id, project_id, owner, name, description, kind, identity_email, identity_id,
     credential, usage_bytes, limit_bytes, available_bytes, quota_updated_at, disabled, created_at";

fn row_to_account(row: &Row<'_>, include_credential: bool) -> rusqlite::Result<StorageAccount> {
    let kind: String = row.get(5)?;
    let kind = AccountKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            Type::Text,
            format!("unknown account kind '{}'", kind).into(),
        )
    })?;
    let credential: String = row.get(8)?;
    Ok(StorageAccount {
        id: row.get(0)?,
        project_id: row.get(1)?,
        owner: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        kind,
        identity_email: row.get(6)?,
        identity_id: row.get(7)?,
        credential: include_credential.then(|| Credential::new(credential)),
        usage_bytes: bytes_from_sql(row.get(9)?),
        limit_bytes: bytes_from_sql(row.get(10)?),
        available_bytes: bytes_from_sql(row.get(11)?),
        quota_updated_at: row.get(12)?,
        disabled: flag(row.get(13)?),
        created_at: row.get(14)?,
    })
}

fn query_accounts(
    conn: &Connection,
    where_clause: &str,
    params: impl rusqlite::Params,
    include_credential: bool,
) -> Result<Vec<StorageAccount>, PoolError> {
    let sql = format!("SELECT {} FROM storage_accounts {}", ACCOUNT_COLUMNS, where_clause);
    let mut stmt = conn.prepare(&sql)?;
    let accounts = stmt
        .query_map(params, |row| row_to_account(row, include_credential))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(accounts)
}

/// Insert or update one account row.
pub(crate) fn save_account(conn: &Connection, account: &StorageAccount) -> Result<(), PoolError> {
    let credential = account.credential()?;
    conn.execute(
        "INSERT INTO storage_accounts (id, project_id, owner, name, description, kind,
             identity_email, identity_id, credential, usage_bytes, limit_bytes, available_bytes,
             quota_updated_at, disabled, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(id) DO UPDATE SET
             project_id = excluded.project_id,
             owner = excluded.owner,
             name = excluded.name,
             description = excluded.description,
             kind = excluded.kind,
             identity_email = excluded.identity_email,
             identity_id = excluded.identity_id,
             credential = excluded.credential,
             usage_bytes = excluded.usage_bytes,
             limit_bytes = excluded.limit_bytes,
             available_bytes = excluded.available_bytes,
             quota_updated_at = excluded.quota_updated_at,
             disabled = excluded.disabled",
        params![
            account.id,
            account.project_id,
            account.owner,
            account.name,
            account.description,
            account.kind.as_str(),
            account.identity_email,
            account.identity_id,
            credential.expose(),
            bytes_to_sql(account.usage_bytes),
            bytes_to_sql(account.limit_bytes),
            bytes_to_sql(account.available_bytes),
            account.quota_updated_at,
            account.disabled as i64,
            account.created_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn load_admin(conn: &Connection, project_id: &str) -> Result<Option<StorageAccount>, PoolError> {
    let sql = format!(
        "SELECT {} FROM storage_accounts WHERE project_id = ?1 AND kind IN ('admin', 'legacy_admin')",
        ACCOUNT_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![project_id], |row| row_to_account(row, true))
        .optional()?)
}

pub(crate) fn delete_automated_for_project(conn: &Connection, project_id: &str) -> Result<usize, PoolError> {
    Ok(conn.execute(
        "DELETE FROM storage_accounts WHERE project_id = ?1 AND kind = 'automated'",
        params![project_id],
    )?)
}

pub(crate) fn delete_all_for_project(conn: &Connection, project_id: &str) -> Result<usize, PoolError> {
    Ok(conn.execute(
        "DELETE FROM storage_accounts WHERE project_id = ?1",
        params![project_id],
    )?)
}

pub(crate) fn set_disabled_for_project(
    conn: &Connection,
    project_id: &str,
    disabled: bool,
) -> Result<usize, PoolError> {
    Ok(conn.execute(
        "UPDATE storage_accounts SET disabled = ?2 WHERE project_id = ?1",
        params![project_id, disabled as i64],
    )?)
}

/// Registry over `storage_accounts`, plus the provider handle used to refresh
/// cached quota.
#[derive(Clone)]
pub struct AccountRegistry {
    store: Arc<Store>,
    storage: Arc<dyn CloudStorage>,
    clock: Arc<dyn Clock>,
    refresh_workers: usize,
}

impl AccountRegistry {
    pub fn new(
        store: Arc<Store>,
        storage: Arc<dyn CloudStorage>,
        clock: Arc<dyn Clock>,
        refresh_workers: usize,
    ) -> Self {
        Self {
            store,
            storage,
            clock,
            refresh_workers: refresh_workers.max(1),
        }
    }

    pub fn storage(&self) -> &Arc<dyn CloudStorage> {
        &self.storage
    }

    pub fn save(&self, account: &StorageAccount) -> Result<(), PoolError> {
        self.store
            .broker()
            .write("drivepool", "accounts.save", |conn| save_account(conn, account))
    }

    /// One page (0-based) of an owner's enabled accounts, ordered by name.
    pub fn find_by_owner(
        &self,
        owner: &str,
        page: u32,
        size: u32,
        include_credential: bool,
    ) -> Result<AccountPage, PoolError> {
        let size = size.max(1);
        let offset = i64::from(page) * i64::from(size);
        let mut accounts = self.store.broker().read("accounts.find_by_owner", |conn| {
            query_accounts(
                conn,
                "WHERE owner = ?1 AND disabled = 0 ORDER BY name, id LIMIT ?2 OFFSET ?3",
                params![owner, i64::from(size) + 1, offset],
                include_credential,
            )
        })?;
        let has_more = accounts.len() > size as usize;
        accounts.truncate(size as usize);
        Ok(AccountPage {
            accounts,
            page,
            size,
            has_more,
        })
    }

    pub fn find_by_id(&self, account_id: &str) -> Result<StorageAccount, PoolError> {
        self.store
            .broker()
            .read("accounts.find_by_id", |conn| {
                query_accounts(conn, "WHERE id = ?1", params![account_id], true)
            })?
            .into_iter()
            .next()
            .ok_or_else(|| PoolError::AccountNotFound(account_id.to_string()))
    }

    /// Every account of a project, disabled ones included.
    pub fn list_by_project(
        &self,
        project_id: &str,
        include_credential: bool,
    ) -> Result<Vec<StorageAccount>, PoolError> {
        self.store.broker().read("accounts.list_by_project", |conn| {
            query_accounts(
                conn,
                "WHERE project_id = ?1 ORDER BY kind, name, id",
                params![project_id],
                include_credential,
            )
        })
    }

    pub fn count_accounts(&self, owner: Option<&str>) -> Result<u64, PoolError> {
        self.store.broker().read("accounts.count", |conn| {
            let count: i64 = match owner {
                Some(owner) => conn.query_row(
                    "SELECT COUNT(*) FROM storage_accounts WHERE owner = ?1",
                    params![owner],
                    |r| r.get(0),
                )?,
                None => conn.query_row("SELECT COUNT(*) FROM storage_accounts", [], |r| r.get(0))?,
            };
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    /// The project's admin account. A project that predates admin accounts
    /// keeps its admin key on the project row; in that case a `legacy_admin`
    /// account is derived from it and persisted.
    pub fn find_admin_account(&self, project: &Project) -> Result<StorageAccount, PoolError> {
        let existing = self
            .store
            .broker()
            .read("accounts.find_admin", |conn| load_admin(conn, &project.id))?;
        if let Some(account) = existing {
            return Ok(account);
        }

        let Some(credential) = project.admin_credential.clone() else {
            return Err(PoolError::AdminAccountMissing(project.id.clone()));
        };
        let details = credential.details()?;
        let account = StorageAccount {
            id: time::new_record_id("A"),
            project_id: project.id.clone(),
            owner: project.owner.clone(),
            name: "legacy-admin".to_string(),
            description: "Derived from the project's embedded admin credential".to_string(),
            kind: AccountKind::LegacyAdmin,
            identity_email: details.client_email,
            identity_id: details.client_id,
            credential: Some(credential),
            usage_bytes: 0,
            limit_bytes: 0,
            available_bytes: 0,
            quota_updated_at: None,
            disabled: project.disabled,
            created_at: time::epoch_z(self.clock.now_epoch_secs()),
        };

        let saved = self
            .store
            .broker()
            .write("drivepool", "accounts.derive_legacy_admin", |conn| {
                save_account(conn, &account)
            });
        match saved {
            Ok(()) => {
                tracing::info!(
                    project = %project.id,
                    account = %account.id,
                    "derived legacy admin account"
                );
                Ok(account)
            }
            // Another caller derived it first.
            Err(e) if db::is_constraint_violation(&e) => self
                .store
                .broker()
                .read("accounts.find_admin", |conn| load_admin(conn, &project.id))?
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    /// Replace an account's credential and the identity fields derived from it.
    pub fn update_credential(&self, account_id: &str, blob: &str) -> Result<StorageAccount, PoolError> {
        let credential = Credential::new(blob);
        let details = credential.details()?;
        let changed = self
            .store
            .broker()
            .write("drivepool", "accounts.update_credential", |conn| {
                Ok(conn.execute(
                    "UPDATE storage_accounts SET credential = ?2, identity_email = ?3, identity_id = ?4
                     WHERE id = ?1",
                    params![account_id, credential.expose(), details.client_email, details.client_id],
                )?)
            })?;
        if changed == 0 {
            return Err(PoolError::AccountNotFound(account_id.to_string()));
        }
        tracing::info!(account = account_id, fingerprint = %credential.fingerprint(), "credential updated");
        self.find_by_id(account_id)
    }

    /// Query the provider and overwrite the cached quota columns. Ownership
    /// and identity fields are never touched.
    pub fn refresh_quota(&self, account: &StorageAccount) -> Result<StorageAccount, PoolError> {
        let quota = self
            .storage
            .quota_usage(account.credential()?)
            .map_err(|source| PoolError::QuotaQueryFailed {
                account_id: account.id.clone(),
                source,
            })?;
        let at = time::epoch_z(self.clock.now_epoch_secs());
        let changed = self.store.broker().write("drivepool", "accounts.refresh_quota", |conn| {
            Ok(conn.execute(
                "UPDATE storage_accounts
                 SET usage_bytes = ?2, limit_bytes = ?3, available_bytes = ?4, quota_updated_at = ?5
                 WHERE id = ?1",
                params![
                    account.id,
                    bytes_to_sql(quota.usage),
                    bytes_to_sql(quota.limit),
                    bytes_to_sql(quota.available()),
                    at
                ],
            )?)
        })?;
        if changed == 0 {
            return Err(PoolError::AccountNotFound(account.id.clone()));
        }
        let mut updated = account.clone();
        updated.apply_quota(quota, at);
        tracing::debug!(account = %account.id, limit = quota.limit, usage = quota.usage, "quota refreshed");
        Ok(updated)
    }

    pub fn refresh_quota_by_id(&self, account_id: &str) -> Result<StorageAccount, PoolError> {
        let account = self.find_by_id(account_id)?;
        self.refresh_quota(&account)
    }

    /// Refresh every account of `owner`. One failing account never aborts the rest.
    pub fn refresh_all_for_owner(&self, owner: &str) -> Result<RefreshReport, PoolError> {
        let accounts = self.store.broker().read("accounts.refresh_owner", |conn| {
            query_accounts(conn, "WHERE owner = ?1 ORDER BY id", params![owner], true)
        })?;
        self.refresh_many(accounts)
    }

    /// Refresh every account in the store, disabled ones included.
    pub fn refresh_all(&self) -> Result<RefreshReport, PoolError> {
        let accounts = self.store.broker().read("accounts.refresh_all", |conn| {
            query_accounts(conn, "ORDER BY id", [], true)
        })?;
        self.refresh_many(accounts)
    }

    pub fn refresh_project_quota(&self, project_id: &str) -> Result<RefreshReport, PoolError> {
        let accounts = self.list_by_project(project_id, true)?;
        self.refresh_many(accounts)
    }

    fn refresh_many(&self, accounts: Vec<StorageAccount>) -> Result<RefreshReport, PoolError> {
        let mut report = RefreshReport::default();
        if accounts.is_empty() {
            return Ok(report);
        }

        let workers = worker_pool(self.refresh_workers, accounts.len(), "refresh")?;
        let results: Vec<(String, Result<StorageAccount, PoolError>)> = workers.install(|| {
            accounts
                .par_iter()
                .map(|account| (account.id.clone(), self.refresh_quota(account)))
                .collect()
        });

        for (account_id, result) in results {
            match result {
                Ok(account) => report.refreshed.push(account),
                Err(error) => {
                    tracing::warn!(account = %account_id, error = %error, "quota refresh failed, skipping");
                    report.failures.push(RefreshFailure { account_id, error });
                }
            }
        }
        tracing::info!(
            refreshed = report.refreshed.len(),
            failed = report.failures.len(),
            "bulk quota refresh finished"
        );
        Ok(report)
    }

    /// Optimistic accounting after a completed write of `size_bytes`. The
    /// provider is not consulted; a later refresh corrects any drift.
    pub fn record_write(&self, account_id: &str, size_bytes: u64) -> Result<StorageAccount, PoolError> {
        let at = time::epoch_z(self.clock.now_epoch_secs());
        let changed = self.store.broker().write("drivepool", "accounts.record_write", |conn| {
            Ok(conn.execute(
                "UPDATE storage_accounts
                 SET usage_bytes = usage_bytes + ?2,
                     available_bytes = MAX(limit_bytes - (usage_bytes + ?2), 0),
                     quota_updated_at = ?3
                 WHERE id = ?1",
                params![account_id, bytes_to_sql(size_bytes), at],
            )?)
        })?;
        if changed == 0 {
            return Err(PoolError::AccountNotFound(account_id.to_string()));
        }
        self.find_by_id(account_id)
    }

    /// Enabled automated accounts of `owner` whose cached availability is
    /// strictly above `threshold_bytes`.
    pub(crate) fn admission_candidates(
        &self,
        owner: &str,
        threshold_bytes: u64,
    ) -> Result<Vec<StorageAccount>, PoolError> {
        self.store.broker().read("accounts.admission_candidates", |conn| {
            query_accounts(
                conn,
                "WHERE owner = ?1 AND kind = 'automated' AND disabled = 0 AND available_bytes > ?2
                 ORDER BY id",
                params![owner, bytes_to_sql(threshold_bytes)],
                true,
            )
        })
    }

    /// Delete a file from an account. A file already gone at the provider is
    /// not an error. Index entries are dropped and quota is refreshed.
    pub fn delete_file(&self, account_id: &str, file_id: &str) -> Result<StorageAccount, PoolError> {
        let account = self.find_by_id(account_id)?;
        match self.storage.delete_file(account.credential()?, file_id) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(account = account_id, file = file_id, "file already absent at provider");
            }
            Err(e) => return Err(PoolError::FileDeleteFailed(e)),
        }
        self.store.broker().write("drivepool", "file_index.delete_file", |conn| {
            file_index::delete_by_file(conn, account_id, file_id)
        })?;
        self.refresh_quota(&account)
    }
}

pub fn initialize_accounts_db(store: &Store) -> Result<(), PoolError> {
    store.broker().write("drivepool", "accounts.init", |conn| {
        conn.execute_batch(schemas::STORAGE_ACCOUNTS_SCHEMA)?;
        conn.execute_batch(schemas::STORAGE_ACCOUNTS_INDEX_OWNER)?;
        conn.execute_batch(schemas::STORAGE_ACCOUNTS_INDEX_PROJECT)?;
        conn.execute_batch(schemas::STORAGE_ACCOUNTS_INDEX_ADMISSION)?;
        conn.execute_batch(schemas::STORAGE_ACCOUNTS_UNIQUE_ADMIN)?;
        Ok(())
    })
}
