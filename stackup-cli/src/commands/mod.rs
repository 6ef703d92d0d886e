pub mod check;
pub mod deploy;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Bring up a microservices stack on a local cluster, one step at a time.
#[derive(Debug, Parser)]
#[command(name = "stackup", version, about)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Plan file (default: the configured plan, `stackup.toml`)
    pub plan: Option<PathBuf>,

    /// Parse manifests and print what would happen without touching a cluster
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Commands {
    /// Check the plan's prerequisites and available backends only
    Check {
        /// Plan file (default: the configured plan)
        plan: Option<PathBuf>,
    },
}

/// Dispatch a parsed command line
pub async fn handle(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Check { plan }) => check::check_only(plan).await,
        None => deploy::run_deploy(cli.plan, cli.dry_run).await,
    }
}
