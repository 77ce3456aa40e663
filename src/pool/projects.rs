//! Project lifecycle: creation, enable/disable and deletion cascades.
//!
//! A project groups the storage accounts minted inside one external project.
//! Every multi-row change here runs inside a single broker transaction, so a
//! project and its accounts never disagree about `disabled`, and a failed
//! delete leaves everything in place.

use crate::core::config::ProjectConfig;
use crate::core::db;
use crate::core::error::PoolError;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time::{self, Clock};
use crate::google::{Credential, ExternalError, ServiceUsage};
use crate::pool::accounts::{self, AccountKind, StorageAccount};
use crate::pool::file_index;
use crate::pool::provisioner::{BatchReport, Provisioner};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    pub external_project_id: String,
    pub owner: String,
    pub display_name: String,
    /// Admin key embedded on projects created before admin accounts existed.
    #[serde(skip)]
    pub admin_credential: Option<Credential>,
    pub disabled: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectSummary {
    #[serde(flatten)]
    pub project: Project,
    pub account_count: u64,
    pub automated_count: u64,
}

#[derive(Debug)]
pub struct ProjectCreation {
    pub project: Project,
    pub admin_account: StorageAccount,
    pub batch: BatchReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub file_index_entries: usize,
    pub accounts: usize,
}

const PROJECT_COLUMNS: &str =
    "id, external_project_id, owner, display_name, admin_credential, disabled, created_at";

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    let admin_credential: Option<String> = row.get(4)?;
    Ok(Project {
        id: row.get(0)?,
        external_project_id: row.get(1)?,
        owner: row.get(2)?,
        display_name: row.get(3)?,
        admin_credential: admin_credential.map(Credential::new),
        disabled: db::flag(row.get(5)?),
        created_at: row.get(6)?,
    })
}

pub(crate) fn load_project(conn: &Connection, project_id: &str) -> Result<Option<Project>, PoolError> {
    let sql = format!("SELECT {} FROM projects WHERE id = ?1", PROJECT_COLUMNS);
    Ok(conn
        .query_row(&sql, params![project_id], row_to_project)
        .optional()?)
}

fn load_by_external_id(conn: &Connection, external_project_id: &str) -> Result<Option<Project>, PoolError> {
    let sql = format!("SELECT {} FROM projects WHERE external_project_id = ?1", PROJECT_COLUMNS);
    Ok(conn
        .query_row(&sql, params![external_project_id], row_to_project)
        .optional()?)
}

fn insert_project(conn: &Connection, project: &Project) -> Result<(), PoolError> {
    conn.execute(
        "INSERT INTO projects (id, external_project_id, owner, display_name, admin_credential, disabled, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            project.id,
            project.external_project_id,
            project.owner,
            project.display_name,
            project.admin_credential.as_ref().map(|c| c.expose()),
            project.disabled as i64,
            project.created_at,
        ],
    )?;
    Ok(())
}

fn duplicate_on_conflict(external_project_id: &str) -> impl FnOnce(PoolError) -> PoolError + '_ {
    move |e| {
        if db::is_constraint_violation(&e) {
            PoolError::DuplicateProjectId(external_project_id.to_string())
        } else {
            e
        }
    }
}

#[derive(Clone)]
pub struct ProjectManager {
    store: Arc<Store>,
    provisioner: Provisioner,
    services: Arc<dyn ServiceUsage>,
    config: ProjectConfig,
    clock: Arc<dyn Clock>,
}

impl ProjectManager {
    pub fn new(
        store: Arc<Store>,
        provisioner: Provisioner,
        services: Arc<dyn ServiceUsage>,
        config: ProjectConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            provisioner,
            services,
            config,
            clock,
        }
    }

    pub fn get_project(&self, project_id: &str) -> Result<Project, PoolError> {
        self.store
            .broker()
            .read("projects.get", |conn| load_project(conn, project_id))?
            .ok_or_else(|| PoolError::ProjectNotFound(project_id.to_string()))
    }

    pub fn find_by_external_id(&self, external_project_id: &str) -> Result<Option<Project>, PoolError> {
        self.store
            .broker()
            .read("projects.find_by_external_id", |conn| {
                load_by_external_id(conn, external_project_id)
            })
    }

    /// Projects with their account counts, enabled projects first.
    pub fn list_projects(&self, owner: Option<&str>) -> Result<Vec<ProjectSummary>, PoolError> {
        self.store.broker().read("projects.list", |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.id, p.external_project_id, p.owner, p.display_name, p.admin_credential,
                        p.disabled, p.created_at,
                        COUNT(a.id),
                        COALESCE(SUM(CASE WHEN a.kind = 'automated' THEN 1 ELSE 0 END), 0)
                 FROM projects p
                 LEFT JOIN storage_accounts a ON a.project_id = p.id
                 WHERE (?1 IS NULL OR p.owner = ?1)
                 GROUP BY p.id
                 ORDER BY p.disabled, p.id",
            )?;
            let summaries = stmt
                .query_map(params![owner], |row| {
                    let account_count: i64 = row.get(7)?;
                    let automated_count: i64 = row.get(8)?;
                    Ok(ProjectSummary {
                        project: row_to_project(row)?,
                        account_count: u64::try_from(account_count).unwrap_or(0),
                        automated_count: u64::try_from(automated_count).unwrap_or(0),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(summaries)
        })
    }

    /// Enable whichever of the configured APIs are missing. Returns the ones
    /// enabled by this call.
    pub fn ensure_required_apis(
        &self,
        admin: &Credential,
        external_project_id: &str,
    ) -> Result<Vec<String>, PoolError> {
        let not_enabled = |source: ExternalError| PoolError::RequiredApisNotEnabled {
            project: external_project_id.to_string(),
            source,
        };
        let enabled = self
            .services
            .enabled_services(admin, external_project_id)
            .map_err(not_enabled)?;

        let mut newly_enabled = Vec::new();
        for api in &self.config.required_apis {
            if enabled.iter().any(|e| e == api) {
                continue;
            }
            self.services
                .enable_service(admin, external_project_id, api)
                .map_err(not_enabled)?;
            tracing::info!(project = external_project_id, api = %api, "enabled required API");
            newly_enabled.push(api.clone());
        }
        Ok(newly_enabled)
    }

    /// Create a project with its admin account, then provision
    /// `accounts_requested` storage accounts.
    ///
    /// The project row and the admin account are written in one transaction.
    /// A duplicate external project id fails before any write.
    pub fn create_project(
        &self,
        display_name: &str,
        admin_blob: &str,
        accounts_requested: usize,
        owner: &str,
    ) -> Result<ProjectCreation, PoolError> {
        let credential = Credential::new(admin_blob);
        let details = credential.details()?;
        let external_project_id = details.project_id.clone();

        if self.find_by_external_id(&external_project_id)?.is_some() {
            return Err(PoolError::DuplicateProjectId(external_project_id));
        }
        self.ensure_required_apis(&credential, &external_project_id)?;

        let created_at = time::epoch_z(self.clock.now_epoch_secs());
        let project = Project {
            id: time::new_record_id("P"),
            external_project_id: external_project_id.clone(),
            owner: owner.to_string(),
            display_name: display_name.to_string(),
            admin_credential: None,
            disabled: false,
            created_at: created_at.clone(),
        };
        let admin_account = StorageAccount {
            id: time::new_record_id("A"),
            project_id: project.id.clone(),
            owner: owner.to_string(),
            name: "admin".to_string(),
            description: format!("Admin account for {}", display_name),
            kind: AccountKind::Admin,
            identity_email: details.client_email,
            identity_id: details.client_id,
            credential: Some(credential),
            usage_bytes: 0,
            limit_bytes: 0,
            available_bytes: 0,
            quota_updated_at: None,
            disabled: false,
            created_at,
        };

        self.store
            .broker()
            .transaction("drivepool", "projects.create", |conn| {
                if load_by_external_id(conn, &external_project_id)?.is_some() {
                    return Err(PoolError::DuplicateProjectId(external_project_id.clone()));
                }
                insert_project(conn, &project)?;
                accounts::save_account(conn, &admin_account)?;
                Ok(())
            })
            .map_err(duplicate_on_conflict(&external_project_id))?;
        tracing::info!(
            project = %project.id,
            external_project = %external_project_id,
            owner,
            "project created"
        );

        let batch = self.provisioner.provision_batch(&project, accounts_requested)?;
        Ok(ProjectCreation {
            project,
            admin_account,
            batch,
        })
    }

    /// Store a project whose admin key lives on the project row. Its admin
    /// account is derived on first use.
    pub fn register_legacy_project(
        &self,
        display_name: &str,
        admin_blob: &str,
        owner: &str,
    ) -> Result<Project, PoolError> {
        let credential = Credential::new(admin_blob);
        let details = credential.details()?;
        let project = Project {
            id: time::new_record_id("P"),
            external_project_id: details.project_id,
            owner: owner.to_string(),
            display_name: display_name.to_string(),
            admin_credential: Some(credential),
            disabled: false,
            created_at: time::epoch_z(self.clock.now_epoch_secs()),
        };
        let external_project_id = project.external_project_id.clone();
        self.store
            .broker()
            .write("drivepool", "projects.register_legacy", |conn| {
                insert_project(conn, &project)
            })
            .map_err(duplicate_on_conflict(&external_project_id))?;
        tracing::info!(project = %project.id, external_project = %external_project_id, "legacy project registered");
        Ok(project)
    }

    pub fn provision_accounts(&self, project_id: &str, count: usize) -> Result<BatchReport, PoolError> {
        let project = self.get_project(project_id)?;
        self.provisioner.provision_batch(&project, count)
    }

    fn set_disabled(&self, project_id: &str, disabled: bool) -> Result<usize, PoolError> {
        let op = if disabled { "projects.disable" } else { "projects.enable" };
        let accounts = self.store.broker().transaction("drivepool", op, |conn| {
            let changed = conn.execute(
                "UPDATE projects SET disabled = ?2 WHERE id = ?1",
                params![project_id, disabled as i64],
            )?;
            if changed == 0 {
                return Err(PoolError::ProjectNotFound(project_id.to_string()));
            }
            accounts::set_disabled_for_project(conn, project_id, disabled)
        })?;
        tracing::info!(project = project_id, disabled, accounts, "project state changed");
        Ok(accounts)
    }

    /// Returns the number of accounts re-enabled with the project.
    pub fn enable_project(&self, project_id: &str) -> Result<usize, PoolError> {
        self.set_disabled(project_id, false)
    }

    /// Disabled accounts are kept but excluded from admission and listings.
    pub fn disable_project(&self, project_id: &str) -> Result<usize, PoolError> {
        self.set_disabled(project_id, true)
    }

    /// Remove index entries, then accounts, then the project itself.
    pub fn delete_project(&self, project_id: &str) -> Result<DeleteSummary, PoolError> {
        let summary = self
            .store
            .broker()
            .transaction("drivepool", "projects.delete", |conn| {
                if load_project(conn, project_id)?.is_none() {
                    return Err(PoolError::ProjectNotFound(project_id.to_string()));
                }
                let file_index_entries = file_index::delete_by_project(conn, project_id)?;
                let accounts = accounts::delete_all_for_project(conn, project_id)?;
                conn.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
                Ok(DeleteSummary {
                    file_index_entries,
                    accounts,
                })
            })?;
        tracing::info!(
            project = project_id,
            accounts = summary.accounts,
            files = summary.file_index_entries,
            "project deleted"
        );
        Ok(summary)
    }
}

pub fn initialize_projects_db(store: &Store) -> Result<(), PoolError> {
    store.broker().write("drivepool", "projects.init", |conn| {
        conn.execute_batch(schemas::PROJECTS_SCHEMA)?;
        conn.execute_batch(schemas::PROJECTS_INDEX_OWNER)?;
        Ok(())
    })
}
