//! Centralized database schema definitions for the pool store.
//!
//! All state lives in a single SQLite database (`pool.db`):
//! 1. projects: administrative projects, one per external project id.
//! 2. storage_accounts: quota-limited shards plus each project's admin account.
//! 3. file_index: derived listing of files per account, cheap to rebuild.

pub const POOL_DB_NAME: &str = "pool.db";
pub const BROKER_EVENTS_NAME: &str = "broker.events.jsonl";
pub const CONFIG_FILE_NAME: &str = "pool.toml";
pub const POOL_SCHEMA_VERSION: u32 = 1;

pub const POOL_DB_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

// --- Projects ---

pub const PROJECTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        external_project_id TEXT NOT NULL UNIQUE,
        owner TEXT NOT NULL,
        display_name TEXT NOT NULL,
        admin_credential TEXT, -- legacy embedded admin key, NULL for new projects
        disabled INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )
";
pub const PROJECTS_INDEX_OWNER: &str =
    "CREATE INDEX IF NOT EXISTS idx_projects_owner ON projects(owner)";

// --- Storage accounts ---

pub const STORAGE_ACCOUNTS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS storage_accounts (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        owner TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL, -- admin, automated, legacy_admin
        identity_email TEXT NOT NULL,
        identity_id TEXT NOT NULL,
        credential TEXT NOT NULL,
        usage_bytes INTEGER NOT NULL DEFAULT 0,
        limit_bytes INTEGER NOT NULL DEFAULT 0,
        available_bytes INTEGER NOT NULL DEFAULT 0,
        quota_updated_at TEXT,
        disabled INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        FOREIGN KEY(project_id) REFERENCES projects(id)
    )
";
pub const STORAGE_ACCOUNTS_INDEX_OWNER: &str =
    "CREATE INDEX IF NOT EXISTS idx_accounts_owner ON storage_accounts(owner, name)";
pub const STORAGE_ACCOUNTS_INDEX_PROJECT: &str =
    "CREATE INDEX IF NOT EXISTS idx_accounts_project ON storage_accounts(project_id)";
pub const STORAGE_ACCOUNTS_INDEX_ADMISSION: &str = "CREATE INDEX IF NOT EXISTS idx_accounts_admission
     ON storage_accounts(owner, kind, disabled, available_bytes)";
pub const STORAGE_ACCOUNTS_UNIQUE_ADMIN: &str = "CREATE UNIQUE INDEX IF NOT EXISTS uq_accounts_admin
     ON storage_accounts(project_id) WHERE kind IN ('admin', 'legacy_admin')";

// --- File index ---

pub const FILE_INDEX_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS file_index (
        id TEXT PRIMARY KEY,
        file_id TEXT NOT NULL,
        name TEXT NOT NULL,
        size INTEGER NOT NULL DEFAULT 0,
        mime_type TEXT NOT NULL DEFAULT '',
        account_id TEXT NOT NULL,
        owner TEXT NOT NULL,
        project_id TEXT NOT NULL,
        created_time TEXT,
        modified_time TEXT,
        sync_time TEXT NOT NULL
    )
";
pub const FILE_INDEX_INDEX_PROJECT: &str =
    "CREATE INDEX IF NOT EXISTS idx_file_index_project ON file_index(project_id)";
pub const FILE_INDEX_INDEX_ACCOUNT: &str =
    "CREATE INDEX IF NOT EXISTS idx_file_index_account ON file_index(account_id)";
pub const FILE_INDEX_INDEX_FILE: &str =
    "CREATE INDEX IF NOT EXISTS idx_file_index_file ON file_index(file_id)";
