//! Provisioner: mints new storage accounts inside a project.
//!
//! An account is an identity plus a freshly minted key. New identities are
//! not usable at the provider straight away, so every new key goes through a
//! readiness poll against the quota endpoint before the account is persisted.

use crate::core::config::{BatchPolicy, ProvisioningConfig};
use crate::core::error::PoolError;
use crate::core::retry::RetryPolicy;
use crate::core::time;
use crate::google::{Credential, ExternalError, Identity, IdentityApi, Quota};
use crate::pool::accounts::{AccountKind, AccountRegistry, StorageAccount};
use crate::pool::projects::Project;
use crate::pool::worker_pool;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rayon::prelude::*;
use std::sync::Arc;

/// State of one readiness poll. Never persisted.
#[derive(Debug, Default)]
pub struct ProvisioningAttempt {
    pub attempts: u32,
    pub last_error: Option<ExternalError>,
}

impl ProvisioningAttempt {
    fn record_failure(&mut self, error: ExternalError) {
        self.last_error = Some(error);
    }

    fn into_timeout(self) -> PoolError {
        PoolError::QuotaNotReadyTimeout {
            attempts: self.attempts,
            last_error: self
                .last_error
                .unwrap_or_else(|| ExternalError::new("drive", "no quota response observed")),
        }
    }
}

/// Quota captured by a successful readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub quota: Quota,
    pub attempts: u32,
}

#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub error: PoolError,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub requested: usize,
    pub provisioned: Vec<StorageAccount>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.provisioned.len() == self.requested
    }
}

/// `<prefix>-<epoch secs, 8 hex>-<6 random>`. Concurrent workers in the same
/// second are kept apart by the random suffix.
pub fn generate_account_name(prefix: &str, now_secs: u64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{:08x}-{}", prefix, now_secs & 0xffff_ffff, suffix)
}

#[derive(Clone)]
pub struct Provisioner {
    registry: AccountRegistry,
    identity: Arc<dyn IdentityApi>,
    retry: RetryPolicy,
    config: ProvisioningConfig,
}

impl Provisioner {
    pub fn new(
        registry: AccountRegistry,
        identity: Arc<dyn IdentityApi>,
        retry: RetryPolicy,
        config: ProvisioningConfig,
    ) -> Self {
        Self {
            registry,
            identity,
            retry,
            config,
        }
    }

    pub fn identity_api(&self) -> &Arc<dyn IdentityApi> {
        &self.identity
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        self.config.batch_policy
    }

    /// Poll the quota endpoint with `credential` until it answers or the
    /// retry ceiling is reached. Blocks the caller between attempts.
    pub fn await_ready(&self, credential: &Credential) -> Result<Readiness, PoolError> {
        let mut attempt = ProvisioningAttempt::default();
        loop {
            attempt.attempts += 1;
            match self.registry.storage().quota_usage(credential) {
                Ok(quota) => {
                    tracing::debug!(
                        fingerprint = %credential.fingerprint(),
                        attempts = attempt.attempts,
                        "credential ready"
                    );
                    return Ok(Readiness {
                        quota,
                        attempts: attempt.attempts,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        fingerprint = %credential.fingerprint(),
                        attempt = attempt.attempts,
                        error = %e,
                        "quota endpoint not ready"
                    );
                    attempt.record_failure(e);
                }
            }
            if self.retry.is_exhausted(attempt.attempts) {
                return Err(attempt.into_timeout());
            }
            self.retry.pause_after(attempt.attempts);
        }
    }

    /// Mint a key for an existing identity, wait for it to become usable and
    /// build the account record. The caller persists it.
    pub fn enroll_identity(
        &self,
        project: &Project,
        admin: &Credential,
        identity: &Identity,
    ) -> Result<StorageAccount, PoolError> {
        let credential = self
            .identity
            .create_key(admin, identity)
            .map_err(PoolError::CredentialCreateFailed)?;
        let details = credential.details()?;
        let readiness = self.await_ready(&credential)?;
        let now = time::epoch_z(self.retry.clock().now_epoch_secs());

        let name = identity
            .email
            .split('@')
            .next()
            .unwrap_or(&identity.email)
            .to_string();
        let mut account = StorageAccount {
            id: time::new_record_id("A"),
            project_id: project.id.clone(),
            owner: project.owner.clone(),
            name,
            description: identity.display_name.clone(),
            kind: AccountKind::Automated,
            identity_email: details.client_email,
            identity_id: details.client_id,
            credential: Some(credential),
            usage_bytes: 0,
            limit_bytes: 0,
            available_bytes: 0,
            quota_updated_at: None,
            disabled: project.disabled,
            created_at: now.clone(),
        };
        account.apply_quota(readiness.quota, now);
        Ok(account)
    }

    pub fn provision_one(&self, project: &Project) -> Result<StorageAccount, PoolError> {
        let admin = self.registry.find_admin_account(project)?;
        let admin_credential = admin.credential()?;
        let name = generate_account_name(
            &self.config.account_prefix,
            self.retry.clock().now_epoch_secs(),
        );

        let identity = self
            .identity
            .create_identity(admin_credential, &project.external_project_id, &name, &name)
            .map_err(PoolError::IdentityCreateFailed)?;
        let account = self.enroll_identity(project, admin_credential, &identity)?;
        self.registry.save(&account)?;

        tracing::info!(
            project = %project.id,
            account = %account.id,
            identity = %account.identity_email,
            limit = account.limit_bytes,
            "storage account provisioned"
        );
        Ok(account)
    }

    /// Provision `count` accounts under the configured batch policy.
    ///
    /// `Sequential` stops at the first failure and returns it unchanged.
    /// `Pooled` runs a bounded worker pool and records failures in the report.
    pub fn provision_batch(&self, project: &Project, count: usize) -> Result<BatchReport, PoolError> {
        let mut report = BatchReport {
            requested: count,
            ..BatchReport::default()
        };
        if count == 0 {
            return Ok(report);
        }

        match self.config.batch_policy {
            BatchPolicy::Sequential => {
                for index in 0..count {
                    match self.provision_one(project) {
                        Ok(account) => report.provisioned.push(account),
                        Err(e) => {
                            tracing::error!(
                                project = %project.id,
                                index,
                                remaining = count - index - 1,
                                error = %e,
                                "batch provisioning aborted"
                            );
                            return Err(e);
                        }
                    }
                }
            }
            BatchPolicy::Pooled => {
                let workers = worker_pool(self.config.workers, count, "provision")?;
                let results: Vec<(usize, Result<StorageAccount, PoolError>)> = workers.install(|| {
                    (0..count)
                        .into_par_iter()
                        .map(|index| (index, self.provision_one(project)))
                        .collect()
                });
                for (index, result) in results {
                    match result {
                        Ok(account) => report.provisioned.push(account),
                        Err(error) => {
                            tracing::warn!(project = %project.id, index, error = %error, "account provisioning failed");
                            report.failures.push(BatchFailure { index, error });
                        }
                    }
                }
            }
        }

        tracing::info!(
            project = %project.id,
            requested = count,
            provisioned = report.provisioned.len(),
            failed = report.failures.len(),
            "batch provisioning finished"
        );
        Ok(report)
    }
}
