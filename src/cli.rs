//! CLI struct definitions for the `drivepool` command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "drivepool",
    version = env!("CARGO_PKG_VERSION"),
    about = "Storage capacity pool: inspect and maintain projects and storage accounts"
)]
pub(crate) struct Cli {
    /// Store root directory holding pool.db and pool.toml.
    #[clap(long, global = true, default_value = ".drivepool")]
    pub root: PathBuf,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create the store (schema and audit log) if missing
    Init,
    /// Effective pool configuration
    Config(ConfigCli),
    /// Projects and their lifecycle
    Project(ProjectCli),
    /// Storage accounts and cached quota
    Account(AccountCli),
    /// Database broker audit trail
    Broker(BrokerCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct ConfigCli {
    #[clap(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ConfigCommand {
    /// Print the configuration after defaults are applied
    Show,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ProjectCli {
    #[clap(subcommand)]
    pub command: ProjectCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ProjectCommand {
    /// List projects with account counts
    List {
        /// Only projects of this owner
        #[clap(long)]
        owner: Option<String>,
    },
    /// Show one project and its accounts
    Show { id: String },
    /// Enable a project and all of its accounts
    Enable { id: String },
    /// Disable a project and all of its accounts
    Disable { id: String },
    /// Delete a project, its accounts and index entries
    Delete {
        id: String,
        /// Required; deletion cannot be undone
        #[clap(long)]
        yes: bool,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct AccountCli {
    #[clap(subcommand)]
    pub command: AccountCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AccountCommand {
    /// List an owner's enabled accounts
    List {
        #[clap(long)]
        owner: String,
        /// Page number, starting at 0
        #[clap(long, default_value_t = 0)]
        page: u32,
        #[clap(long, default_value_t = 50)]
        size: u32,
    },
    /// Show one account
    Show { id: String },
    /// Record a completed write against an account's cached quota
    RecordWrite {
        id: String,
        /// Bytes written
        #[clap(long)]
        bytes: u64,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct BrokerCli {
    #[clap(subcommand)]
    pub command: BrokerCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum BrokerCommand {
    /// Print the most recent audit events
    Audit {
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
}
