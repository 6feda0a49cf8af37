//! Conduit CLI
//!
//! Command-line interface for planning, submitting and following pipelines.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use conduit_orchestrator::OrchestratorConfig;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "conduit")]
#[command(about = "Conduit pipeline orchestration CLI", long_about = None)]
struct Cli {
    /// User the commands act on behalf of
    #[arg(long, env = "CONDUIT_USER", default_value = "local")]
    user: String,

    /// SQLite URL of the task store
    #[arg(long, env = "CONDUIT_DATABASE_URL")]
    database_url: Option<String>,

    /// Root directory for step workspaces
    #[arg(long, env = "CONDUIT_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// JSON file listing the registered tools
    #[arg(long, env = "CONDUIT_TOOLS_FILE")]
    tools_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "conduit_cli=info,conduit_orchestrator=info,conduit_runs=info,conduit_planner=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut orchestrator =
        OrchestratorConfig::from_env().context("Invalid orchestrator configuration")?;
    if let Some(url) = cli.database_url {
        orchestrator.database_url = url;
    }
    if let Some(root) = cli.workspace_root {
        orchestrator.workspace_root = root;
    }
    if let Some(file) = cli.tools_file {
        orchestrator.tools_file = file;
    }
    orchestrator
        .validate()
        .context("Invalid orchestrator configuration")?;

    let config = Config {
        user_uid: cli.user,
        orchestrator,
    };
    tracing::debug!(
        user = %config.user_uid,
        database_url = %config.orchestrator.database_url,
        tools_file = %config.orchestrator.tools_file.display(),
        "Configuration loaded"
    );

    handle_command(cli.command, &config).await
}
