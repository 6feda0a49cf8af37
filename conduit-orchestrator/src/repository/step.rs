//! Step Repository
//!
//! Handles all database operations related to steps.

use chrono::{DateTime, Utc};
use conduit_core::domain::run::RunInfo;
use conduit_core::domain::task::{Step, StepStatus};
use conduit_core::domain::value::StepArgs;
use sqlx::types::Json;
use sqlx::{SqliteExecutor, SqlitePool};
use std::path::Path;
use uuid::Uuid;

/// Insert a step belonging to `task_uid`
pub async fn insert<'e, E>(executor: E, task_uid: Uuid, step: &Step) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO steps (step_uid, task_uid, step_number, tool_name, args, purpose, status)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(step.step_uid)
    .bind(task_uid)
    .bind(step.step_number)
    .bind(&step.tool_name)
    .bind(Json(&step.args))
    .bind(&step.purpose)
    .bind(status_to_string(step.status))
    .execute(executor)
    .await?;

    Ok(())
}

/// All steps of a task, in execution order
pub async fn find_by_task(pool: &SqlitePool, task_uid: Uuid) -> Result<Vec<Step>, sqlx::Error> {
    let rows = sqlx::query_as::<_, StepRow>(
        r#"
        SELECT step_uid, step_number, tool_name, args, purpose, status, run_id, output_dir,
               log_path, status_path, exit_code, error_message, started_at, finished_at
        FROM steps
        WHERE task_uid = ?
        ORDER BY step_number ASC
        "#,
    )
    .bind(task_uid)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Step::try_from).collect()
}

pub async fn mark_running(
    pool: &SqlitePool,
    step_uid: Uuid,
    output_dir: &Path,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE steps
        SET status = 'running', output_dir = ?, started_at = ?
        WHERE step_uid = ?
        "#,
    )
    .bind(output_dir.to_string_lossy().into_owned())
    .bind(Utc::now())
    .bind(step_uid)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the run backing a step and where its files live
pub async fn record_run(pool: &SqlitePool, step_uid: Uuid, run: &RunInfo) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE steps
        SET run_id = ?, log_path = ?, status_path = ?
        WHERE step_uid = ?
        "#,
    )
    .bind(&run.run_id)
    .bind(run.log_path.to_string_lossy().into_owned())
    .bind(run.status_path.to_string_lossy().into_owned())
    .bind(step_uid)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_succeeded(
    pool: &SqlitePool,
    step_uid: Uuid,
    exit_code: Option<i32>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE steps
        SET status = 'succeeded', exit_code = ?, finished_at = ?
        WHERE step_uid = ?
        "#,
    )
    .bind(exit_code)
    .bind(Utc::now())
    .bind(step_uid)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_failed(
    pool: &SqlitePool,
    step_uid: Uuid,
    exit_code: Option<i32>,
    error_message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE steps
        SET status = 'failed', exit_code = ?, error_message = ?, finished_at = ?
        WHERE step_uid = ?
        "#,
    )
    .bind(exit_code)
    .bind(error_message)
    .bind(Utc::now())
    .bind(step_uid)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fail every step of a task still marked running; returns how many were
pub async fn fail_running(
    pool: &SqlitePool,
    task_uid: Uuid,
    error_message: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE steps
        SET status = 'failed', error_message = ?, finished_at = ?
        WHERE task_uid = ? AND status = 'running'
        "#,
    )
    .bind(error_message)
    .bind(Utc::now())
    .bind(task_uid)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Queued => "queued",
        StepStatus::Running => "running",
        StepStatus::Succeeded => "succeeded",
        StepStatus::Failed => "failed",
    }
}

fn string_to_status(s: &str) -> Result<StepStatus, sqlx::Error> {
    match s {
        "queued" => Ok(StepStatus::Queued),
        "running" => Ok(StepStatus::Running),
        "succeeded" => Ok(StepStatus::Succeeded),
        "failed" => Ok(StepStatus::Failed),
        other => Err(sqlx::Error::Decode(
            format!("unknown step status '{}'", other).into(),
        )),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct StepRow {
    step_uid: Uuid,
    step_number: u32,
    tool_name: String,
    args: Json<StepArgs>,
    purpose: Option<String>,
    status: String,
    run_id: Option<String>,
    output_dir: Option<String>,
    log_path: Option<String>,
    status_path: Option<String>,
    exit_code: Option<i32>,
    error_message: Option<String>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<StepRow> for Step {
    type Error = sqlx::Error;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(Step {
            step_uid: row.step_uid,
            step_number: row.step_number,
            tool_name: row.tool_name,
            args: row.args.0,
            purpose: row.purpose,
            status: string_to_status(&row.status)?,
            run_id: row.run_id,
            output_dir: row.output_dir,
            log_path: row.log_path,
            status_path: row.status_path,
            exit_code: row.exit_code,
            error_message: row.error_message,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_round_trip() {
        for status in [StepStatus::Queued, StepStatus::Running, StepStatus::Failed] {
            assert_eq!(string_to_status(status_to_string(status)).unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_a_decode_error() {
        let err = string_to_status("paused").unwrap_err();
        assert!(matches!(err, sqlx::Error::Decode(_)));
        assert!(err.to_string().contains("unknown step status 'paused'"));
    }
}
