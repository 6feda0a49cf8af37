//! Conduit Orchestrator
//!
//! Durable task state and the scheduler that executes it:
//! - DB: SQLite pool and schema
//! - Repository: free functions per table
//! - Service: task lifecycle, dataset catalog, and the single-worker scheduler
//!
//! The store is the source of truth. Any process may read it or write a
//! cancel; only the worker that dequeued a task writes its execution state.

pub mod config;
pub mod db;
pub mod error;
pub mod repository;
pub mod service;

use conduit_runs::{RunManager, ToolRegistry};
use std::sync::Arc;

pub use config::OrchestratorConfig;
pub use error::SchedulerError;
pub use service::scheduler::{Recovery, TaskScheduler};

/// Load the tool registry, open the store and assemble a scheduler
///
/// The worker is not started; call [`TaskScheduler::start`] for that.
pub async fn open(config: &OrchestratorConfig) -> Result<Arc<TaskScheduler>, SchedulerError> {
    let registry = ToolRegistry::from_file(&config.tools_file)?;
    tracing::info!(tools = registry.len(), path = %config.tools_file.display(), "Loaded tool registry");

    let pool = db::connect(&config.database_url, config.max_connections).await?;
    let runs = Arc::new(RunManager::new(Arc::new(registry), &config.workspace_root));

    Ok(Arc::new(TaskScheduler::new(pool, runs, config)))
}
