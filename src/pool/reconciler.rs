//! Reconciler: rebuild a project's automated accounts from the provider's
//! identity list.
//!
//! Local automated accounts and index entries are purged, then every remote
//! identity other than the admin's gets a fresh key and a new account row.
//! Identities are handled independently; one failure is recorded and the
//! loop moves on.

use crate::core::error::{IdentityFailure, PoolError};
use crate::core::store::Store;
use crate::core::supervisor::TaskSupervisor;
use crate::google::{Credential, Identity};
use crate::pool::accounts::{self, AccountRegistry, StorageAccount};
use crate::pool::file_index::{self, FileReindexer};
use crate::pool::projects::{self, Project};
use crate::pool::provisioner::Provisioner;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct SyncReport {
    pub project_id: String,
    pub purged_accounts: usize,
    pub purged_index_entries: usize,
    pub synced: Vec<StorageAccount>,
    pub revoked_keys: usize,
    pub failures: Vec<IdentityFailure>,
}

impl SyncReport {
    pub fn has_warnings(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Turn per-identity warnings into a hard error.
    pub fn into_result(self) -> Result<Vec<StorageAccount>, PoolError> {
        if self.failures.is_empty() {
            Ok(self.synced)
        } else {
            Err(PoolError::ReconciliationPartialFailure(self.failures))
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<Store>,
    registry: AccountRegistry,
    provisioner: Provisioner,
    indexer: Arc<dyn FileReindexer>,
    supervisor: Arc<TaskSupervisor>,
}

impl Reconciler {
    pub fn new(
        store: Arc<Store>,
        registry: AccountRegistry,
        provisioner: Provisioner,
        indexer: Arc<dyn FileReindexer>,
        supervisor: Arc<TaskSupervisor>,
    ) -> Self {
        Self {
            store,
            registry,
            provisioner,
            indexer,
            supervisor,
        }
    }

    /// The legacy embedded key if present, otherwise the admin account's key.
    fn admin_credential(&self, project: &Project) -> Result<Credential, PoolError> {
        if let Some(credential) = &project.admin_credential {
            return Ok(credential.clone());
        }
        let admin = self.registry.find_admin_account(project)?;
        Ok(admin.credential()?.clone())
    }

    /// Delete every user-managed key of `identity`. Failures are logged; a
    /// stale key left behind does not block minting a new one.
    fn revoke_keys(&self, admin: &Credential, identity: &Identity) -> usize {
        let keys = match self.provisioner.identity_api().list_keys(admin, identity) {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(identity = %identity.email, error = %e, "could not list keys");
                return 0;
            }
        };
        let mut revoked = 0;
        for key in keys.iter().filter(|k| !k.system_managed) {
            match self.provisioner.identity_api().delete_key(admin, &key.name) {
                Ok(()) => revoked += 1,
                Err(e) => tracing::warn!(identity = %identity.email, key = %key.name, error = %e, "could not revoke key"),
            }
        }
        revoked
    }

    fn sync_identity(
        &self,
        project: &Project,
        admin: &Credential,
        identity: &Identity,
    ) -> Result<(StorageAccount, usize), PoolError> {
        let revoked = self.revoke_keys(admin, identity);
        let account = self.provisioner.enroll_identity(project, admin, identity)?;
        self.registry.save(&account)?;

        let indexer = Arc::clone(&self.indexer);
        let reindexed = account.clone();
        // The account is already persisted; a reindex that cannot start is
        // only a warning.
        if let Err(e) = self.supervisor.spawn("reindex", move || {
            indexer.reindex_account(&reindexed).map(|_| ())
        }) {
            tracing::warn!(account = %account.id, error = %e, "reindex not started");
        }
        Ok((account, revoked))
    }

    pub fn sync_project_with_google(&self, project_id: &str) -> Result<SyncReport, PoolError> {
        let (project, purged_index_entries, purged_accounts) =
            self.store
                .broker()
                .transaction("drivepool", "reconciler.purge", |conn| {
                    let project = projects::load_project(conn, project_id)?
                        .ok_or_else(|| PoolError::ProjectNotFound(project_id.to_string()))?;
                    let entries = file_index::delete_by_project(conn, project_id)?;
                    let accounts = accounts::delete_automated_for_project(conn, project_id)?;
                    Ok((project, entries, accounts))
                })?;
        tracing::info!(
            project = project_id,
            purged_accounts,
            purged_index_entries,
            "local accounts purged for reconciliation"
        );

        let admin = self.admin_credential(&project)?;
        let admin_email = admin.details()?.client_email;
        let identities = self
            .provisioner
            .identity_api()
            .list_identities(&admin, &project.external_project_id)
            .map_err(PoolError::IdentityListFailed)?;

        let mut report = SyncReport {
            project_id: project_id.to_string(),
            purged_accounts,
            purged_index_entries,
            ..SyncReport::default()
        };
        for identity in identities.iter().filter(|i| i.email != admin_email) {
            match self.sync_identity(&project, &admin, identity) {
                Ok((account, revoked)) => {
                    report.revoked_keys += revoked;
                    report.synced.push(account);
                }
                Err(error) => {
                    tracing::warn!(
                        project = project_id,
                        identity = %identity.email,
                        error = %error,
                        "identity reconciliation failed, continuing"
                    );
                    report.failures.push(IdentityFailure {
                        identity_email: identity.email.clone(),
                        error,
                    });
                }
            }
        }

        tracing::info!(
            project = project_id,
            synced = report.synced.len(),
            failed = report.failures.len(),
            revoked = report.revoked_keys,
            "reconciliation finished"
        );
        Ok(report)
    }
}
