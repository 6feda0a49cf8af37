//! ID resolver module
//!
//! Resolves task UUID prefixes against the current user's tasks, so short
//! unambiguous prefixes can stand in for full UUIDs.

use anyhow::{Context, Result, anyhow};
use conduit_orchestrator::TaskScheduler;
use conduit_orchestrator::service::task_service;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a task ID or prefix to a full UUID
///
/// # Errors
/// Returns an error if:
/// - No task of the user matches the prefix
/// - Several tasks match the prefix (ambiguous)
/// - The task store cannot be read
pub async fn resolve_task_id(
    scheduler: &TaskScheduler,
    user_uid: &str,
    id_or_prefix: &IdOrPrefix,
) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let prefix = id_or_prefix.to_string();
    let tasks = task_service::list_tasks(scheduler.pool(), user_uid)
        .await
        .context("Failed to fetch tasks for ID resolution")?;

    let matches: Vec<Uuid> = tasks
        .iter()
        .map(|t| t.task_uid)
        .filter(|uid| uid.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No task found with ID starting with '{}'", prefix)),
        [uid] => Ok(*uid),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple tasks: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
