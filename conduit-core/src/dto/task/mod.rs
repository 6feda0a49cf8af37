//! Task API DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::task::{PlannedStep, TaskStatus};

/// Request to create a new task from a compiled plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    pub user_uid: String,
    pub steps: Vec<PlannedStep>,
    /// Reject steps naming tools that are not currently registered
    #[serde(default = "default_check_tools")]
    pub check_tools: bool,
}

fn default_check_tools() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_uid: Uuid,
}

/// Acknowledgement of a cancel request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelTaskAck {
    pub task_uid: Uuid,
    /// Status after the request was applied
    pub status: TaskStatus,
    /// Whether a running process was signalled
    pub run_terminated: bool,
}
