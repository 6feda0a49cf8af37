//! Task and step domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value::StepArgs;

/// One stage of a compiled plan, before it is persisted
///
/// This is the only shape the scheduler accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step_number: u32,
    pub tool_name: String,
    #[serde(default)]
    pub args: StepArgs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// Task execution record
///
/// Persisted by the orchestrator, which is its only writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_uid: Uuid,
    pub user_uid: String,
    pub total_steps: u32,
    pub status: TaskStatus,
    pub current_step_number: Option<u32>,
    pub current_step_uid: Option<Uuid>,
    pub last_completed_step: u32,
    pub failed_step_number: Option<u32>,
    pub failed_step_uid: Option<Uuid>,
    pub failure: Option<TaskFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<Step>,
}

impl Task {
    pub fn step(&self, step_number: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }
}

/// Task execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Succeeded => write!(f, "succeeded"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// One persisted pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_uid: Uuid,
    pub step_number: u32,
    pub tool_name: String,
    pub args: StepArgs,
    pub purpose: Option<String>,
    pub status: StepStatus,
    pub run_id: Option<String>,
    pub output_dir: Option<String>,
    pub log_path: Option<String>,
    pub status_path: Option<String>,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Queued => write!(f, "queued"),
            StepStatus::Running => write!(f, "running"),
            StepStatus::Succeeded => write!(f, "succeeded"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Where in the lifecycle a task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Resolution,
    Launch,
    Run,
    Canceled,
    Interrupted,
    /// The worker itself hit an error, e.g. a store failure
    Internal,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStage::Resolution => write!(f, "resolution"),
            FailureStage::Launch => write!(f, "launch"),
            FailureStage::Run => write!(f, "run"),
            FailureStage::Canceled => write!(f, "canceled"),
            FailureStage::Interrupted => write!(f, "interrupted"),
            FailureStage::Internal => write!(f, "internal"),
        }
    }
}

/// Structured reason reported alongside a failed or canceled task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub stage: FailureStage,
    pub message: String,
}

/// Deterministic identity of a step within its task
pub fn step_uid(task_uid: Uuid, step_number: u32) -> Uuid {
    Uuid::new_v5(&task_uid, &step_number.to_be_bytes())
}

/// Checks that step numbers are exactly `1..=N`, in any order
pub fn check_step_numbers(numbers: &[u32]) -> Result<(), String> {
    if numbers.is_empty() {
        return Err("plan has no steps".to_string());
    }

    let mut sorted = numbers.to_vec();
    sorted.sort_unstable();
    if sorted[0] == 0 {
        return Err("step numbers start at 1".to_string());
    }
    for (expected, actual) in (1u32..).zip(&sorted) {
        if *actual != expected {
            return Err(if *actual < expected {
                format!("step number {} appears more than once", actual)
            } else {
                format!("step numbers must be contiguous from 1, missing {}", expected)
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_uid_is_deterministic_and_distinct() {
        let task = Uuid::new_v4();
        assert_eq!(step_uid(task, 1), step_uid(task, 1));
        assert_ne!(step_uid(task, 1), step_uid(task, 2));
        assert_ne!(step_uid(task, 1), step_uid(Uuid::new_v4(), 1));
    }

    #[test]
    fn test_check_step_numbers() {
        assert!(check_step_numbers(&[1, 2, 3]).is_ok());
        assert!(check_step_numbers(&[2, 1]).is_ok());
        assert!(check_step_numbers(&[]).is_err());
        assert!(check_step_numbers(&[0, 1]).is_err());
        assert!(check_step_numbers(&[1, 3]).unwrap_err().contains("missing 2"));
        assert!(
            check_step_numbers(&[1, 1, 2])
                .unwrap_err()
                .contains("more than once")
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Succeeded.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_planned_step_args_default_to_empty() {
        let step: PlannedStep =
            serde_json::from_str(r#"{"step_number": 1, "tool_name": "ingest"}"#).unwrap();
        assert!(step.args.is_empty());
        assert!(step.purpose.is_none());
    }
}
