//! Task Service
//!
//! Task creation, status queries and cancellation. Execution lives in
//! [`crate::service::scheduler`]; everything here is a single committed
//! read or write against the store.

use chrono::Utc;
use conduit_core::domain::task::{Step, StepStatus, Task, TaskStatus, check_step_numbers, step_uid};
use conduit_core::domain::tool::ToolSpec;
use conduit_core::dto::task::{CancelTaskAck, CreateTask};
use conduit_runs::{RunError, RunManager, ToolRegistry};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SchedulerError;
use crate::repository::{step_repository, task_repository};

/// Validate and persist a new queued task with its steps
///
/// The task and all of its steps are written in one transaction.
pub async fn create_task(
    pool: &SqlitePool,
    registry: &ToolRegistry,
    req: CreateTask,
) -> Result<Task, SchedulerError> {
    if req.user_uid.trim().is_empty() {
        return Err(SchedulerError::Validation("user uid cannot be empty".to_string()));
    }

    let numbers: Vec<u32> = req.steps.iter().map(|s| s.step_number).collect();
    check_step_numbers(&numbers).map_err(SchedulerError::Validation)?;

    for step in &req.steps {
        if let Some((name, _)) = step
            .args
            .iter()
            .find(|(_, value)| value.literals().iter().any(|l| !l.is_finite()))
        {
            return Err(SchedulerError::Validation(format!(
                "step {} argument '{}' is not a finite number",
                step.step_number, name
            )));
        }
    }

    if req.check_tools {
        let mut unknown: Vec<String> = req
            .steps
            .iter()
            .filter(|s| !registry.contains(&s.tool_name))
            .map(|s| s.tool_name.clone())
            .collect();
        unknown.sort();
        unknown.dedup();
        if !unknown.is_empty() {
            return Err(SchedulerError::UnknownTools(unknown));
        }
    }

    let task_uid = Uuid::new_v4();
    let mut planned = req.steps;
    planned.sort_by_key(|s| s.step_number);

    let steps: Vec<Step> = planned
        .into_iter()
        .map(|s| Step {
            step_uid: step_uid(task_uid, s.step_number),
            step_number: s.step_number,
            tool_name: s.tool_name,
            args: s.args,
            purpose: s.purpose,
            status: StepStatus::Queued,
            run_id: None,
            output_dir: None,
            log_path: None,
            status_path: None,
            exit_code: None,
            error_message: None,
            started_at: None,
            finished_at: None,
        })
        .collect();

    let task = Task {
        task_uid,
        user_uid: req.user_uid,
        total_steps: steps.len() as u32,
        status: TaskStatus::Queued,
        current_step_number: None,
        current_step_uid: None,
        last_completed_step: 0,
        failed_step_number: None,
        failed_step_uid: None,
        failure: None,
        created_at: Utc::now(),
        started_at: None,
        finished_at: None,
        steps,
    };

    let mut tx = pool.begin().await?;
    task_repository::insert(&mut *tx, &task).await?;
    for step in &task.steps {
        step_repository::insert(&mut *tx, task_uid, step).await?;
    }
    tx.commit().await?;

    info!(
        task_uid = %task.task_uid,
        user = %task.user_uid,
        steps = task.total_steps,
        "Task created"
    );

    Ok(task)
}

/// Get a task with its steps, as last committed
pub async fn get_task_status(pool: &SqlitePool, task_uid: Uuid) -> Result<Task, SchedulerError> {
    let mut task = task_repository::find_by_id(pool, task_uid)
        .await?
        .ok_or(SchedulerError::NotFound(task_uid))?;

    task.steps = step_repository::find_by_task(pool, task_uid).await?;
    Ok(task)
}

/// List a user's tasks, newest first
///
/// Step details are not loaded; use [`get_task_status`] for those.
pub async fn list_tasks(pool: &SqlitePool, user_uid: &str) -> Result<Vec<Task>, SchedulerError> {
    Ok(task_repository::list_by_user(pool, user_uid).await?)
}

/// Tool specs of every registered tool, sorted by name
pub fn list_tools(registry: &ToolRegistry) -> Vec<ToolSpec> {
    registry.specs()
}

/// Cancel a task
///
/// Marks the task canceled and signals its active run, if this process owns
/// it. Canceling a terminal task changes nothing. A run owned by another
/// process is stopped by that process's worker when it next sees the status.
pub async fn cancel_task(
    pool: &SqlitePool,
    runs: &RunManager,
    task_uid: Uuid,
) -> Result<CancelTaskAck, SchedulerError> {
    let task = get_task_status(pool, task_uid).await?;

    if task.status.is_terminal() {
        debug!(task_uid = %task_uid, status = %task.status, "Cancel requested for finished task");
        return Ok(CancelTaskAck {
            task_uid,
            status: task.status,
            run_terminated: false,
        });
    }

    let canceled = task_repository::mark_canceled(pool, task_uid, "canceled by request").await?;
    if !canceled {
        // finished between the read and the write
        let status = task_repository::find_status(pool, task_uid)
            .await?
            .ok_or(SchedulerError::NotFound(task_uid))?;
        return Ok(CancelTaskAck {
            task_uid,
            status,
            run_terminated: false,
        });
    }

    info!(task_uid = %task_uid, "Task canceled");

    let active_run = task
        .current_step_number
        .and_then(|n| task.step(n))
        .filter(|s| s.status == StepStatus::Running)
        .and_then(|s| s.run_id.clone());

    let run_terminated = match active_run {
        Some(run_id) => match runs.cancel(&run_id).await {
            Ok(ack) => ack.terminated,
            Err(RunError::NotFound(_)) => {
                debug!(run_id = %run_id, "Run not owned by this process");
                false
            }
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Failed to signal run");
                false
            }
        },
        None => false,
    };

    Ok(CancelTaskAck {
        task_uid,
        status: TaskStatus::Canceled,
        run_terminated,
    })
}

/// Poll until the task reaches a terminal status
pub async fn wait_for_terminal(
    pool: &SqlitePool,
    task_uid: Uuid,
    poll: Duration,
) -> Result<Task, SchedulerError> {
    let mut interval = tokio::time::interval(poll);
    loop {
        interval.tick().await;
        let status = task_repository::find_status(pool, task_uid)
            .await?
            .ok_or(SchedulerError::NotFound(task_uid))?;
        if status.is_terminal() {
            return get_task_status(pool, task_uid).await;
        }
    }
}
