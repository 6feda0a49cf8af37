//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod dataset;
mod plan;
mod task;

pub use dataset::DatasetCommands;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List registered tools and their parameters
    Tools,
    /// Compile a natural-language request into a plan
    Plan {
        /// What the pipeline should do
        intent: String,

        /// Restrict planning to these tools (comma separated)
        #[arg(long, value_delimiter = ',')]
        tools: Vec<String>,

        /// Write the plan to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a plan file and queue it as a task
    Submit {
        /// Plan JSON file
        plan: PathBuf,

        /// Skip the registered-tool check
        #[arg(long)]
        no_check_tools: bool,
    },
    /// Submit a plan and execute it here, streaming logs until it finishes
    Run {
        /// Plan JSON file
        plan: PathBuf,
    },
    /// Execute queued tasks until interrupted
    Worker,
    /// Show a task and its steps
    Status {
        /// Task ID or unambiguous prefix
        id: String,
    },
    /// List your tasks, newest first
    List,
    /// Show the logs of a task's runs
    Logs {
        /// Task ID or unambiguous prefix
        id: String,

        /// Only this step
        #[arg(short, long)]
        step: Option<u32>,

        /// Keep printing until the task finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Cancel a task
    Cancel {
        /// Task ID or unambiguous prefix
        id: String,
    },
    /// Dataset catalog management
    Dataset {
        #[command(subcommand)]
        command: DatasetCommands,
    },
}

/// Routes the command to the appropriate handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Tools => plan::list_tools(config).await,
        Commands::Plan {
            intent,
            tools,
            output,
        } => plan::compile_plan(config, &intent, tools, output).await,
        Commands::Submit {
            plan,
            no_check_tools,
        } => task::submit(config, &plan, !no_check_tools).await,
        Commands::Run { plan } => task::run(config, &plan).await,
        Commands::Worker => task::worker(config).await,
        Commands::Status { id } => task::status(config, &id).await,
        Commands::List => task::list(config).await,
        Commands::Logs { id, step, follow } => task::logs(config, &id, step, follow).await,
        Commands::Cancel { id } => task::cancel(config, &id).await,
        Commands::Dataset { command } => dataset::handle_dataset_command(command, config).await,
    }
}
