//! Dataset command handlers

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use conduit_core::resolver::PUBLIC_OWNER;
use conduit_orchestrator::service::catalog_service;

use crate::config::Config;

#[derive(Subcommand)]
pub enum DatasetCommands {
    /// Register a dataset
    Add {
        /// Catalog id referenced by plans
        id: i64,

        /// Directory holding the dataset
        path: String,

        /// Make the dataset readable by every user
        #[arg(long)]
        public: bool,
    },
    /// List the datasets you can read
    List,
}

pub async fn handle_dataset_command(command: DatasetCommands, config: &Config) -> Result<()> {
    let pool = conduit_orchestrator::db::connect(
        &config.orchestrator.database_url,
        config.orchestrator.max_connections,
    )
    .await?;

    match command {
        DatasetCommands::Add { id, path, public } => {
            let owner = if public {
                PUBLIC_OWNER
            } else {
                config.user_uid.as_str()
            };
            let row = catalog_service::register_dataset(&pool, id, owner, &path).await?;
            println!(
                "{} Dataset {} registered ({}, owner {})",
                "✓".green(),
                row.id.to_string().cyan(),
                row.path,
                row.owner_uid
            );
        }
        DatasetCommands::List => {
            let rows = catalog_service::list_datasets(&pool, &config.user_uid).await?;
            if rows.is_empty() {
                println!("{}", "No datasets found.".yellow());
            } else {
                println!("{}", format!("Found {} dataset(s):", rows.len()).bold());
                for row in rows {
                    let owner = if row.owner_uid == PUBLIC_OWNER {
                        row.owner_uid.green()
                    } else {
                        row.owner_uid.normal()
                    };
                    println!("  {:>6}  {}  {}", row.id.to_string().cyan(), owner, row.path);
                }
            }
        }
    }
    Ok(())
}
