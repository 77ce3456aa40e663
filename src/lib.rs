//! drivepool: a storage capacity pool over many quota-limited accounts.
//!
//! Many small external storage accounts ("shards"), grouped under
//! administrative projects, are presented as one large storage surface. This
//! crate is the engine behind that surface:
//!
//! - **Account registry**: storage-account records with a cached quota.
//! - **Provisioner**: mints identities and keys, waits for them to become
//!   usable, persists the resulting accounts.
//! - **Admission**: chooses an account with room for a pending write and
//!   hands out a short-lived token for it.
//! - **Project lifecycle**: atomic creation, cascading enable/disable/delete.
//! - **Reconciler**: rebuilds a project's accounts from the provider's
//!   identity list.
//!
//! # The Thin Waist
//!
//! All state lives in one SQLite database under the store root. Every
//! mutation goes through [`core::broker::DbBroker`], which serializes writes
//! and appends an audit line to `broker.events.jsonl`. Cascades run inside a
//! single broker transaction.
//!
//! # Collaborators
//!
//! The provider is reached only through the traits in [`google`].
//! [`google::memory::InMemoryGoogle`] implements them in process.
//!
//! # Crate Structure
//!
//! - [`core`]: store, broker, errors, config, clock, retry, supervision, logging
//! - [`google`]: collaborator contracts and credential handling
//! - [`pool`]: the engine subsystems and [`pool::Engine`]

pub mod core;
pub mod google;
pub mod pool;

mod cli;
mod subsystems;

use crate::cli::{
    AccountCommand, BrokerCommand, Cli, Command, ConfigCommand, OutputFormat, ProjectCommand,
};
use crate::core::config::{self, PoolConfig};
use crate::core::error::PoolError;
use crate::core::output::{compact_line, human_bytes};
use crate::core::store::Store;
use crate::core::time::command_envelope;
use crate::google::Unconfigured;
use crate::pool::accounts::StorageAccount;
use crate::pool::{Collaborators, Engine, EngineOptions};
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use serde_json::json;

/// Print `value` in a JSON envelope, or run the text renderer.
fn emit<T: Serialize>(
    format: OutputFormat,
    cmd: &str,
    key: &str,
    value: &T,
    text: impl FnOnce(),
) -> Result<(), PoolError> {
    match format {
        OutputFormat::Json => {
            let mut extra = serde_json::Map::new();
            extra.insert(key.to_string(), serde_json::to_value(value)?);
            let envelope = command_envelope(cmd, "ok", serde_json::Value::Object(extra));
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        OutputFormat::Text => text(),
    }
    Ok(())
}

fn print_account(account: &StorageAccount) {
    let state = if account.disabled {
        "disabled".red()
    } else {
        "enabled".green()
    };
    println!(
        "{}  {:<12} {:<28} {} free of {}  [{}]",
        account.id.bright_white(),
        account.kind.as_str(),
        compact_line(&account.name, 28),
        human_bytes(account.available_bytes),
        human_bytes(account.limit_bytes),
        state
    );
}

/// Store-local commands run against an engine without a provider.
fn offline_engine(store: Store, config: PoolConfig) -> Result<Engine, PoolError> {
    let provider = std::sync::Arc::new(Unconfigured);
    Engine::new(
        store,
        Collaborators::from_provider(provider),
        config,
        EngineOptions::default(),
    )
}

pub fn run() -> Result<(), PoolError> {
    let cli = Cli::parse();
    let format = cli.format;
    let config = config::load_config(&cli.root)?;
    let store = Store::open(&cli.root)?;
    tracing::debug!(root = %cli.root.display(), "store opened");

    match cli.command {
        Command::Init => {
            let root = store.root.display().to_string();
            emit(format, "init", "root", &root, || {
                println!("{} store ready at {}", "✓".green(), root.bright_white());
            })?;
        }
        Command::Config(config_cli) => match config_cli.command {
            ConfigCommand::Show => {
                let text = config.to_toml()?;
                emit(format, "config.show", "config", &config, || print!("{}", text))?;
            }
        },
        Command::Project(project_cli) => {
            let engine = offline_engine(store, config)?;
            match project_cli.command {
                ProjectCommand::List { owner } => {
                    let projects = engine.projects().list_projects(owner.as_deref())?;
                    emit(format, "project.list", "projects", &projects, || {
                        if projects.is_empty() {
                            println!("No projects.");
                        }
                        for summary in &projects {
                            let p = &summary.project;
                            let state = if p.disabled { "disabled".red() } else { "enabled".green() };
                            println!(
                                "{}  {:<24} {:<20} accounts={} (automated={})  [{}]",
                                p.id.bright_white(),
                                compact_line(&p.display_name, 24),
                                p.external_project_id,
                                summary.account_count,
                                summary.automated_count,
                                state
                            );
                        }
                    })?;
                }
                ProjectCommand::Show { id } => {
                    let project = engine.projects().get_project(&id)?;
                    let accounts = engine.accounts().list_by_project(&id, false)?;
                    let view = json!({ "project": project, "accounts": accounts });
                    emit(format, "project.show", "project", &view, || {
                        println!(
                            "{} {} ({}) owner={}",
                            project.id.bright_white(),
                            project.display_name,
                            project.external_project_id,
                            project.owner
                        );
                        for account in &accounts {
                            print_account(account);
                        }
                    })?;
                }
                ProjectCommand::Enable { id } => {
                    let accounts = engine.enable_project(&id)?;
                    emit(format, "project.enable", "accounts", &accounts, || {
                        println!("{} enabled {} ({} accounts)", "✓".green(), id, accounts);
                    })?;
                }
                ProjectCommand::Disable { id } => {
                    let accounts = engine.disable_project(&id)?;
                    emit(format, "project.disable", "accounts", &accounts, || {
                        println!("{} disabled {} ({} accounts)", "✓".green(), id, accounts);
                    })?;
                }
                ProjectCommand::Delete { id, yes } => {
                    if !yes {
                        return Err(PoolError::Validation(
                            "Refusing to delete without --yes".to_string(),
                        ));
                    }
                    let summary = engine.delete_project(&id)?;
                    emit(format, "project.delete", "deleted", &summary, || {
                        println!(
                            "{} deleted {} ({} accounts, {} index entries)",
                            "✓".green(),
                            id,
                            summary.accounts,
                            summary.file_index_entries
                        );
                    })?;
                }
            }
        }
        Command::Account(account_cli) => {
            let engine = offline_engine(store, config)?;
            match account_cli.command {
                AccountCommand::List { owner, page, size } => {
                    let listing = engine.accounts().find_by_owner(&owner, page, size, false)?;
                    emit(format, "account.list", "page", &listing, || {
                        for account in &listing.accounts {
                            print_account(account);
                        }
                        if listing.has_more {
                            println!("(more: --page {})", page + 1);
                        }
                    })?;
                }
                AccountCommand::Show { id } => {
                    let account = engine.accounts().find_by_id(&id)?;
                    emit(format, "account.show", "account", &account, || {
                        print_account(&account);
                        println!("  identity: {} ({})", account.identity_email, account.identity_id);
                        if let Some(at) = &account.quota_updated_at {
                            println!("  quota updated: {}", at);
                        }
                    })?;
                }
                AccountCommand::RecordWrite { id, bytes } => {
                    let account = engine.record_write(&id, bytes)?;
                    emit(format, "account.record_write", "account", &account, || {
                        print_account(&account);
                    })?;
                }
            }
        }
        Command::Broker(broker_cli) => match broker_cli.command {
            BrokerCommand::Audit { limit } => {
                let events = store.broker().audit_events()?;
                let recent: Vec<_> = events.iter().rev().take(limit).rev().cloned().collect();
                emit(format, "broker.audit", "events", &recent, || {
                    if recent.is_empty() {
                        println!("No audit log found.");
                    }
                    for ev in &recent {
                        let status = if ev.status == "success" {
                            ev.status.green()
                        } else {
                            ev.status.red()
                        };
                        println!("{} {:<10} {:<32} {}", ev.ts, ev.actor, ev.op, status);
                    }
                })?;
            }
        },
    }
    Ok(())
}
