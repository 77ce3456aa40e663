//! The capacity pool engine.
//!
//! [`Engine`] is wired once at startup from a [`Store`], the provider
//! collaborators and a [`PoolConfig`]. It owns one instance of each service
//! and exposes the operations the request layer calls.

pub mod accounts;
pub mod admission;
pub mod file_index;
pub mod projects;
pub mod provisioner;
pub mod reconciler;

use crate::core::config::PoolConfig;
use crate::core::error::PoolError;
use crate::core::retry::RetryPolicy;
use crate::core::store::Store;
use crate::core::supervisor::{TaskFailure, TaskSupervisor};
use crate::core::time::{Clock, SystemClock};
use crate::google::{CloudStorage, IdentityApi, ServiceUsage};
use accounts::{AccountRegistry, RefreshReport, StorageAccount};
use admission::{AdmissionSelector, WriteGrant};
use file_index::{DriveFileIndexer, FileReindexer};
use projects::{DeleteSummary, ProjectCreation, ProjectManager};
use provisioner::{BatchReport, Provisioner};
use rand::SeedableRng;
use rand::rngs::StdRng;
use reconciler::{Reconciler, SyncReport};
use std::sync::Arc;

/// Bounded rayon pool sized to `min(workers, jobs)`.
pub(crate) fn worker_pool(
    workers: usize,
    jobs: usize,
    name: &'static str,
) -> Result<rayon::ThreadPool, PoolError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.min(jobs).max(1))
        .thread_name(move |i| format!("drivepool-{}-{}", name, i))
        .build()
        .map_err(|e| PoolError::Io(std::io::Error::other(e.to_string())))
}

/// The external services the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub storage: Arc<dyn CloudStorage>,
    pub identity: Arc<dyn IdentityApi>,
    pub services: Arc<dyn ServiceUsage>,
}

impl Collaborators {
    /// Use one provider object for all three contracts.
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: CloudStorage + IdentityApi + ServiceUsage + 'static,
    {
        Self {
            storage: provider.clone(),
            identity: provider.clone(),
            services: provider,
        }
    }
}

/// Runtime seams. Defaults: system clock, entropy-seeded admission RNG and
/// the provider-backed file indexer.
#[derive(Default)]
pub struct EngineOptions {
    pub clock: Option<Arc<dyn Clock>>,
    pub rng_seed: Option<u64>,
    pub indexer: Option<Arc<dyn FileReindexer>>,
}

pub struct Engine {
    store: Arc<Store>,
    config: PoolConfig,
    registry: AccountRegistry,
    provisioner: Provisioner,
    admission: AdmissionSelector,
    projects: ProjectManager,
    reconciler: Reconciler,
    supervisor: Arc<TaskSupervisor>,
}

impl Engine {
    pub fn new(
        store: Store,
        collaborators: Collaborators,
        config: PoolConfig,
        options: EngineOptions,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let store = Arc::new(store);
        let clock: Arc<dyn Clock> = options.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let supervisor = Arc::new(TaskSupervisor::new());

        let registry = AccountRegistry::new(
            Arc::clone(&store),
            Arc::clone(&collaborators.storage),
            Arc::clone(&clock),
            config.refresh.workers,
        );
        let provisioner = Provisioner::new(
            registry.clone(),
            Arc::clone(&collaborators.identity),
            RetryPolicy::from_config(&config.readiness, Arc::clone(&clock)),
            config.provisioning.clone(),
        );
        let admission = match options.rng_seed {
            Some(seed) => AdmissionSelector::new(
                registry.clone(),
                config.admission.safety_buffer_bytes,
                StdRng::seed_from_u64(seed),
            ),
            None => AdmissionSelector::from_entropy(
                registry.clone(),
                config.admission.safety_buffer_bytes,
            ),
        };
        let projects = ProjectManager::new(
            Arc::clone(&store),
            provisioner.clone(),
            Arc::clone(&collaborators.services),
            config.project.clone(),
            Arc::clone(&clock),
        );
        let indexer = options.indexer.unwrap_or_else(|| {
            Arc::new(DriveFileIndexer::new(
                Arc::clone(&store),
                Arc::clone(&collaborators.storage),
                Arc::clone(&clock),
                config.index.page_size,
            ))
        });
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            registry.clone(),
            provisioner.clone(),
            indexer,
            Arc::clone(&supervisor),
        );

        Ok(Self {
            store,
            config,
            registry,
            provisioner,
            admission,
            projects,
            reconciler,
            supervisor,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.registry
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn admission(&self) -> &AdmissionSelector {
        &self.admission
    }

    pub fn projects(&self) -> &ProjectManager {
        &self.projects
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Join background work (reindexing) and collect its failures.
    pub fn wait_background(&self) -> Vec<TaskFailure> {
        self.supervisor.wait()
    }

    /// Tasks still running. Finished ones are reaped and their failures logged.
    pub fn pending_background(&self) -> usize {
        self.supervisor.pending()
    }

    /// Stop accepting background work, then join what is in flight.
    pub fn shutdown(&self) -> Vec<TaskFailure> {
        self.supervisor.close();
        self.supervisor.wait()
    }

    pub fn create_project(
        &self,
        display_name: &str,
        admin_blob: &str,
        accounts_requested: usize,
        owner: &str,
    ) -> Result<ProjectCreation, PoolError> {
        self.projects
            .create_project(display_name, admin_blob, accounts_requested, owner)
    }

    pub fn provision_accounts(&self, project_id: &str, count: usize) -> Result<BatchReport, PoolError> {
        self.projects.provision_accounts(project_id, count)
    }

    pub fn enable_project(&self, project_id: &str) -> Result<usize, PoolError> {
        self.projects.enable_project(project_id)
    }

    pub fn disable_project(&self, project_id: &str) -> Result<usize, PoolError> {
        self.projects.disable_project(project_id)
    }

    pub fn delete_project(&self, project_id: &str) -> Result<DeleteSummary, PoolError> {
        self.projects.delete_project(project_id)
    }

    pub fn sync_project_with_google(&self, project_id: &str) -> Result<SyncReport, PoolError> {
        self.reconciler.sync_project_with_google(project_id)
    }

    pub fn select_account_for_write(&self, owner: &str, size_bytes: u64) -> Result<WriteGrant, PoolError> {
        self.admission.select_account_for_write(owner, size_bytes)
    }

    pub fn record_write(&self, account_id: &str, size_bytes: u64) -> Result<StorageAccount, PoolError> {
        self.admission.record_write(account_id, size_bytes)
    }

    pub fn refresh_quota(&self, account_id: &str) -> Result<StorageAccount, PoolError> {
        self.registry.refresh_quota_by_id(account_id)
    }

    pub fn refresh_all_quota(&self, owner: &str) -> Result<RefreshReport, PoolError> {
        self.registry.refresh_all_for_owner(owner)
    }

    /// Maintenance sweep over every account, whatever its owner.
    pub fn refresh_every_account(&self) -> Result<RefreshReport, PoolError> {
        self.registry.refresh_all()
    }
}
