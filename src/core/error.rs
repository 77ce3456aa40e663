use crate::google::ExternalError;
use std::io;
use thiserror::Error;

/// One identity that could not be reconciled.
#[derive(Debug)]
pub struct IdentityFailure {
    pub identity_email: String,
    pub error: PoolError,
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Project with external id '{0}' already exists")]
    DuplicateProjectId(String),
    #[error("Required APIs could not be enabled for '{project}': {source}")]
    RequiredApisNotEnabled {
        project: String,
        #[source]
        source: ExternalError,
    },
    #[error("Identity creation failed: {0}")]
    IdentityCreateFailed(#[source] ExternalError),
    #[error("Credential creation failed: {0}")]
    CredentialCreateFailed(#[source] ExternalError),
    #[error("Credential could not be parsed: {0}")]
    CredentialParseFailed(String),
    #[error("Quota endpoint not ready after {attempts} attempts: {last_error}")]
    QuotaNotReadyTimeout {
        attempts: u32,
        last_error: ExternalError,
    },
    #[error("Quota query failed for account '{account_id}': {source}")]
    QuotaQueryFailed {
        account_id: String,
        #[source]
        source: ExternalError,
    },
    #[error("No account with sufficient capacity for {size_bytes} bytes (owner '{owner}')")]
    NoCapacityAvailable { owner: String, size_bytes: u64 },
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Project not found: {0}")]
    ProjectNotFound(String),
    #[error("Project '{0}' has no admin credential")]
    AdminAccountMissing(String),
    #[error("Listing identities failed: {0}")]
    IdentityListFailed(#[source] ExternalError),
    #[error("Access token could not be minted: {0}")]
    TokenMintFailed(#[source] ExternalError),
    #[error("File deletion failed: {0}")]
    FileDeleteFailed(#[source] ExternalError),
    #[error("File listing failed: {0}")]
    FileListFailed(#[source] ExternalError),
    #[error("Reconciliation finished with {} identity failure(s)", .0.len())]
    ReconciliationPartialFailure(Vec<IdentityFailure>),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl PoolError {
    /// True for failures caused by the external provider rather than local state.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            PoolError::RequiredApisNotEnabled { .. }
                | PoolError::IdentityCreateFailed(_)
                | PoolError::CredentialCreateFailed(_)
                | PoolError::QuotaNotReadyTimeout { .. }
                | PoolError::QuotaQueryFailed { .. }
                | PoolError::IdentityListFailed(_)
                | PoolError::TokenMintFailed(_)
                | PoolError::FileDeleteFailed(_)
                | PoolError::FileListFailed(_)
        )
    }
}
