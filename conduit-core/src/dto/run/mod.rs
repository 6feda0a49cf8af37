//! Run protocol DTOs
//!
//! Responses of the tool call and run polling protocols.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::run::LogLine;

/// Immediate answer to a tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchReceipt {
    pub run_id: String,
    pub log_path: PathBuf,
    pub status_path: PathBuf,
    pub out_dir: PathBuf,
    pub started: bool,
}

/// A page of log lines and the offset to resume from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPoll {
    pub run_id: String,
    pub items: Vec<LogLine>,
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub run_id: String,
    pub done: bool,
    pub exit_code: Option<i32>,
    pub log_path: PathBuf,
    pub status_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCancelAck {
    pub run_id: String,
    pub terminated: bool,
}
