//! Contracts for the external collaborators the pool depends on.
//!
//! The engine never speaks a wire protocol itself. It calls these traits:
//! [`CloudStorage`] for quota and short-lived tokens, [`IdentityApi`] for
//! service identities and their keys, [`ServiceUsage`] for enabling the APIs a
//! project needs. Implementations must be shareable across worker threads.

pub mod credential;
pub mod memory;

pub use credential::{Credential, CredentialDetails};

use crate::core::redact;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by an external API. The message is redacted on
/// construction so it can be logged as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{service}: {message}")]
pub struct ExternalError {
    pub service: String,
    pub message: String,
    pub status: Option<u16>,
}

impl ExternalError {
    pub fn new(service: &str, message: impl AsRef<str>) -> Self {
        Self {
            service: service.to_string(),
            message: redact::redact_string(message.as_ref()),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

/// Storage quota reported by the provider for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub limit: u64,
    pub usage: u64,
}

impl Quota {
    pub fn available(&self) -> u64 {
        self.limit.saturating_sub(self.usage)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub expires_in_secs: u64,
}

/// A service identity inside an external project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Full resource name, e.g. `projects/p/serviceAccounts/x@p.iam...`.
    pub name: String,
    pub email: String,
    pub unique_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityKey {
    pub name: String,
    /// Keys managed by the provider itself cannot be deleted and are skipped.
    pub system_managed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub created_time: Option<String>,
    pub modified_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePage {
    pub files: Vec<RemoteFile>,
    pub next_page_token: Option<String>,
}

pub trait CloudStorage: Send + Sync {
    fn quota_usage(&self, credential: &Credential) -> Result<Quota, ExternalError>;

    /// Short-lived token scoped to the account, handed to the caller so it can
    /// transfer bytes directly with the provider.
    fn mint_access_token(&self, credential: &Credential) -> Result<AccessToken, ExternalError>;

    fn list_files(
        &self,
        credential: &Credential,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<FilePage, ExternalError>;

    fn delete_file(&self, credential: &Credential, file_id: &str) -> Result<(), ExternalError>;
}

pub trait IdentityApi: Send + Sync {
    fn create_identity(
        &self,
        admin: &Credential,
        project_ref: &str,
        name: &str,
        display_name: &str,
    ) -> Result<Identity, ExternalError>;

    /// Mint a new key for `identity`; the returned blob is a full credential.
    fn create_key(&self, admin: &Credential, identity: &Identity) -> Result<Credential, ExternalError>;

    fn list_identities(&self, admin: &Credential, project_ref: &str) -> Result<Vec<Identity>, ExternalError>;

    fn list_keys(&self, admin: &Credential, identity: &Identity) -> Result<Vec<IdentityKey>, ExternalError>;

    fn delete_key(&self, admin: &Credential, key_name: &str) -> Result<(), ExternalError>;
}

pub trait ServiceUsage: Send + Sync {
    fn enabled_services(&self, admin: &Credential, project_ref: &str) -> Result<Vec<String>, ExternalError>;

    fn enable_service(&self, admin: &Credential, project_ref: &str, service: &str) -> Result<(), ExternalError>;
}

/// Provider for store-local commands. Every call fails; the engine can be
/// wired without network access and any operation that needs the provider
/// reports it instead of guessing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unconfigured;

impl Unconfigured {
    fn refuse<T>(service: &str) -> Result<T, ExternalError> {
        Err(ExternalError::new(service, "no provider configured for this command"))
    }
}

impl CloudStorage for Unconfigured {
    fn quota_usage(&self, _: &Credential) -> Result<Quota, ExternalError> {
        Self::refuse("drive")
    }

    fn mint_access_token(&self, _: &Credential) -> Result<AccessToken, ExternalError> {
        Self::refuse("oauth2")
    }

    fn list_files(&self, _: &Credential, _: Option<&str>, _: u32) -> Result<FilePage, ExternalError> {
        Self::refuse("drive")
    }

    fn delete_file(&self, _: &Credential, _: &str) -> Result<(), ExternalError> {
        Self::refuse("drive")
    }
}

impl IdentityApi for Unconfigured {
    fn create_identity(&self, _: &Credential, _: &str, _: &str, _: &str) -> Result<Identity, ExternalError> {
        Self::refuse("iam")
    }

    fn create_key(&self, _: &Credential, _: &Identity) -> Result<Credential, ExternalError> {
        Self::refuse("iam")
    }

    fn list_identities(&self, _: &Credential, _: &str) -> Result<Vec<Identity>, ExternalError> {
        Self::refuse("iam")
    }

    fn list_keys(&self, _: &Credential, _: &Identity) -> Result<Vec<IdentityKey>, ExternalError> {
        Self::refuse("iam")
    }

    fn delete_key(&self, _: &Credential, _: &str) -> Result<(), ExternalError> {
        Self::refuse("iam")
    }
}

impl ServiceUsage for Unconfigured {
    fn enabled_services(&self, _: &Credential, _: &str) -> Result<Vec<String>, ExternalError> {
        Self::refuse("serviceusage")
    }

    fn enable_service(&self, _: &Credential, _: &str, _: &str) -> Result<(), ExternalError> {
        Self::refuse("serviceusage")
    }
}
