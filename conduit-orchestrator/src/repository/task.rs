//! Task Repository
//!
//! Handles all database operations related to tasks. Every transition out of
//! `running` is conditional on the row still being `running`, so a cancel
//! written by another process is never overwritten.

use chrono::{DateTime, Utc};
use conduit_core::domain::task::{FailureStage, Task, TaskFailure, TaskStatus};
use sqlx::{SqliteExecutor, SqlitePool};
use uuid::Uuid;

const TASK_COLUMNS: &str = r#"
    task_uid, user_uid, total_steps, status, current_step_number, current_step_uid,
    last_completed_step, failed_step_number, failed_step_uid, failure_stage,
    failure_message, created_at, started_at, finished_at
"#;

/// Insert a new queued task; steps are inserted separately
pub async fn insert<'e, E>(executor: E, task: &Task) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO tasks (task_uid, user_uid, total_steps, status, last_completed_step, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(task.task_uid)
    .bind(&task.user_uid)
    .bind(task.total_steps)
    .bind(status_to_string(task.status))
    .bind(task.last_completed_step)
    .bind(task.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Find a task by UID, without its steps
pub async fn find_by_id(pool: &SqlitePool, task_uid: Uuid) -> Result<Option<Task>, sqlx::Error> {
    let row = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {} FROM tasks WHERE task_uid = ?",
        TASK_COLUMNS
    ))
    .bind(task_uid)
    .fetch_optional(pool)
    .await?;

    row.map(Task::try_from).transpose()
}

/// Current status only, for cheap polling
pub async fn find_status(
    pool: &SqlitePool,
    task_uid: Uuid,
) -> Result<Option<TaskStatus>, sqlx::Error> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM tasks WHERE task_uid = ?")
        .bind(task_uid)
        .fetch_optional(pool)
        .await?;

    status.map(|s| string_to_status(&s)).transpose()
}

/// Find tasks by status, oldest first
pub async fn find_by_status(pool: &SqlitePool, status: TaskStatus) -> Result<Vec<Task>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {} FROM tasks WHERE status = ? ORDER BY created_at ASC, rowid ASC",
        TASK_COLUMNS
    ))
    .bind(status_to_string(status))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Task::try_from).collect()
}

/// List a user's tasks, newest first
pub async fn list_by_user(pool: &SqlitePool, user_uid: &str) -> Result<Vec<Task>, sqlx::Error> {
    let rows = sqlx::query_as::<_, TaskRow>(&format!(
        "SELECT {} FROM tasks WHERE user_uid = ? ORDER BY created_at DESC, rowid DESC",
        TASK_COLUMNS
    ))
    .bind(user_uid)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Task::try_from).collect()
}

/// Move a queued task to running; false if it was no longer queued
pub async fn mark_running(pool: &SqlitePool, task_uid: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET status = 'running', started_at = ?
        WHERE task_uid = ? AND status = 'queued'
        "#,
    )
    .bind(Utc::now())
    .bind(task_uid)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn set_current_step(
    pool: &SqlitePool,
    task_uid: Uuid,
    step_number: u32,
    step_uid: Uuid,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET current_step_number = ?, current_step_uid = ?
        WHERE task_uid = ? AND status = 'running'
        "#,
    )
    .bind(step_number)
    .bind(step_uid)
    .bind(task_uid)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Advance `last_completed_step`; it never decreases
pub async fn record_step_completed(
    pool: &SqlitePool,
    task_uid: Uuid,
    step_number: u32,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET last_completed_step = MAX(last_completed_step, ?)
        WHERE task_uid = ? AND status = 'running'
        "#,
    )
    .bind(step_number)
    .bind(task_uid)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn mark_succeeded(pool: &SqlitePool, task_uid: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET status = 'succeeded', finished_at = ?
        WHERE task_uid = ? AND status = 'running'
        "#,
    )
    .bind(Utc::now())
    .bind(task_uid)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Fail a running task, recording the failing step and the reason
pub async fn mark_failed(
    pool: &SqlitePool,
    task_uid: Uuid,
    failed_step: Option<(u32, Uuid)>,
    failure: &TaskFailure,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET status = 'failed', failed_step_number = ?, failed_step_uid = ?,
            failure_stage = ?, failure_message = ?, finished_at = ?
        WHERE task_uid = ? AND status = 'running'
        "#,
    )
    .bind(failed_step.map(|(n, _)| n))
    .bind(failed_step.map(|(_, uid)| uid))
    .bind(stage_to_string(failure.stage))
    .bind(&failure.message)
    .bind(Utc::now())
    .bind(task_uid)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Cancel a task that has not reached a terminal state
pub async fn mark_canceled(
    pool: &SqlitePool,
    task_uid: Uuid,
    message: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks
        SET status = 'canceled', failure_stage = 'canceled', failure_message = ?, finished_at = ?
        WHERE task_uid = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(message)
    .bind(Utc::now())
    .bind(task_uid)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Succeeded => "succeeded",
        TaskStatus::Failed => "failed",
        TaskStatus::Canceled => "canceled",
    }
}

fn string_to_status(s: &str) -> Result<TaskStatus, sqlx::Error> {
    match s {
        "queued" => Ok(TaskStatus::Queued),
        "running" => Ok(TaskStatus::Running),
        "succeeded" => Ok(TaskStatus::Succeeded),
        "failed" => Ok(TaskStatus::Failed),
        "canceled" => Ok(TaskStatus::Canceled),
        other => Err(sqlx::Error::Decode(
            format!("unknown task status '{}'", other).into(),
        )),
    }
}

fn stage_to_string(stage: FailureStage) -> &'static str {
    match stage {
        FailureStage::Resolution => "resolution",
        FailureStage::Launch => "launch",
        FailureStage::Run => "run",
        FailureStage::Canceled => "canceled",
        FailureStage::Interrupted => "interrupted",
        FailureStage::Internal => "internal",
    }
}

fn string_to_stage(s: &str) -> Option<FailureStage> {
    match s {
        "resolution" => Some(FailureStage::Resolution),
        "launch" => Some(FailureStage::Launch),
        "run" => Some(FailureStage::Run),
        "canceled" => Some(FailureStage::Canceled),
        "interrupted" => Some(FailureStage::Interrupted),
        "internal" => Some(FailureStage::Internal),
        _ => None,
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_uid: Uuid,
    user_uid: String,
    total_steps: u32,
    status: String,
    current_step_number: Option<u32>,
    current_step_uid: Option<Uuid>,
    last_completed_step: u32,
    failed_step_number: Option<u32>,
    failed_step_uid: Option<Uuid>,
    failure_stage: Option<String>,
    failure_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = sqlx::Error;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let failure = row
            .failure_stage
            .as_deref()
            .and_then(string_to_stage)
            .map(|stage| TaskFailure {
                stage,
                message: row.failure_message.unwrap_or_default(),
            });

        Ok(Task {
            task_uid: row.task_uid,
            user_uid: row.user_uid,
            total_steps: row.total_steps,
            status: string_to_status(&row.status)?,
            current_step_number: row.current_step_number,
            current_step_uid: row.current_step_uid,
            last_completed_step: row.last_completed_step,
            failed_step_number: row.failed_step_number,
            failed_step_uid: row.failed_step_uid,
            failure,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            steps: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip() {
        for status in [TaskStatus::Queued, TaskStatus::Running, TaskStatus::Failed] {
            assert_eq!(string_to_status(status_to_string(status)).unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_a_decode_error() {
        let err = string_to_status("paused").unwrap_err();
        assert!(matches!(err, sqlx::Error::Decode(_)));
        assert!(err.to_string().contains("unknown task status 'paused'"));
    }
}
