//! Run domain types
//!
//! A run is one launched subprocess. Its identity is independent of tasks and
//! steps; the scheduler keeps the step to run mapping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Handle to a launched run and its files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub tool: String,
    pub log_path: PathBuf,
    pub status_path: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// Live completion state of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub done: bool,
    pub exit_code: Option<i32>,
}

impl RunState {
    /// A run succeeded only if it finished with exit code zero
    pub fn succeeded(&self) -> bool {
        self.done && self.exit_code == Some(0)
    }
}

/// Status file contents, one JSON object per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusRecord {
    pub run_id: String,
    pub tool: String,
    pub done: bool,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub terminated: bool,
}

/// Which pipe a log line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One captured output line, as stored in the run's log file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_success_requires_zero_exit() {
        assert!(
            RunState {
                done: true,
                exit_code: Some(0)
            }
            .succeeded()
        );
        assert!(
            !RunState {
                done: true,
                exit_code: None
            }
            .succeeded()
        );
        assert!(
            !RunState {
                done: false,
                exit_code: Some(0)
            }
            .succeeded()
        );
    }
}
