//! Run manager
//!
//! Launches tool processes and owns everything that happens to them after
//! that. Each live run has exactly one pump task which reads both output
//! pipes, appends to the log, writes the terminal status record and then
//! publishes completion on a watch channel. Queries never touch the process;
//! they read the channel or the run's files.

use chrono::Utc;
use conduit_core::domain::run::{LogStream, RunInfo, RunState, RunStatusRecord};
use conduit_core::dto::run::{LaunchReceipt, LogPoll, RunCancelAck, RunStatusReport};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::{Child, Command};
use tokio::sync::{Notify, RwLock, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::RunError;
use crate::invocation::build_invocation;
use crate::log_file::{self, LogWriter};
use crate::registry::ToolRegistry;
use crate::status_file;

const RUNS_DIR: &str = "runs";
const LOG_FILE: &str = "log.jsonl";
const STATUS_FILE: &str = "status.json";

/// Arguments of one tool call
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub tool: String,
    pub in_dir: Option<PathBuf>,
    pub out_dir: PathBuf,
    /// Literal and already-resolved parameters, by name
    pub params: BTreeMap<String, JsonValue>,
    /// Directory the run's `runs/<id>` folder is created under
    pub run_root: Option<PathBuf>,
}

impl LaunchRequest {
    pub fn new(tool: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            in_dir: None,
            out_dir: out_dir.into(),
            params: BTreeMap::new(),
            run_root: None,
        }
    }

    pub fn with_in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.in_dir = Some(dir.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn with_run_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.run_root = Some(root.into());
        self
    }
}

enum RunSource {
    /// Launched by this manager; the pump publishes state here
    Live {
        state: watch::Receiver<RunState>,
        cancel: Arc<Notify>,
    },
    /// Re-registered from files after a restart; state comes from the status file
    Attached,
}

struct RunHandle {
    info: RunInfo,
    source: RunSource,
}

/// Registry of runs and their lifecycle
pub struct RunManager {
    tools: Arc<ToolRegistry>,
    default_root: PathBuf,
    runs: RwLock<HashMap<String, Arc<RunHandle>>>,
}

impl RunManager {
    pub fn new(tools: Arc<ToolRegistry>, default_root: impl Into<PathBuf>) -> Self {
        Self {
            tools,
            default_root: default_root.into(),
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Starts a tool process and returns as soon as it and its pump are running
    ///
    /// # Errors
    /// Returns an error if:
    /// - The tool is not registered
    /// - The run directory or output directory cannot be created
    /// - The process cannot be spawned
    pub async fn launch(&self, request: LaunchRequest) -> Result<RunInfo, RunError> {
        let tool = self
            .tools
            .get(&request.tool)
            .ok_or_else(|| RunError::UnknownTool(request.tool.clone()))?;

        let run_id = Uuid::new_v4().to_string();
        let run_dir = request
            .run_root
            .as_deref()
            .unwrap_or(&self.default_root)
            .join(RUNS_DIR)
            .join(&run_id);
        tokio::fs::create_dir_all(&run_dir).await?;
        tokio::fs::create_dir_all(&request.out_dir).await?;

        let info = RunInfo {
            run_id: run_id.clone(),
            tool: request.tool.clone(),
            log_path: run_dir.join(LOG_FILE),
            status_path: run_dir.join(STATUS_FILE),
            started_at: Utc::now(),
        };

        let log = LogWriter::create(&info.log_path).await?;
        status_file::write(&info.status_path, &initial_record(&info)).await?;

        let spec = build_invocation(
            tool,
            &run_id,
            request.in_dir.as_deref(),
            &request.out_dir,
            &request.params,
        )?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!(run_id = %run_id, tool = %request.tool, "Failed to spawn tool: {}", source);
                let mut record = initial_record(&info);
                record.done = true;
                record.finished_at = Some(Utc::now());
                if let Err(e) = status_file::write(&info.status_path, &record).await {
                    warn!(run_id = %run_id, "Failed to record spawn failure: {}", e);
                }
                return Err(RunError::Spawn {
                    tool: request.tool,
                    source,
                });
            }
        };

        let (state_tx, state_rx) = watch::channel(RunState::default());
        let cancel = Arc::new(Notify::new());

        tokio::spawn(pump(child, info.clone(), log, state_tx, Arc::clone(&cancel)));

        info!(
            run_id = %run_id,
            tool = %request.tool,
            out_dir = %request.out_dir.display(),
            "Launched run"
        );

        self.runs.write().await.insert(
            run_id,
            Arc::new(RunHandle {
                info: info.clone(),
                source: RunSource::Live {
                    state: state_rx,
                    cancel,
                },
            }),
        );

        Ok(info)
    }

    /// Tool call protocol: launch and answer with the receipt
    pub async fn call_tool(&self, request: LaunchRequest) -> Result<LaunchReceipt, RunError> {
        let out_dir = request.out_dir.clone();
        let info = self.launch(request).await?;
        Ok(LaunchReceipt {
            run_id: info.run_id,
            log_path: info.log_path,
            status_path: info.status_path,
            out_dir,
            started: true,
        })
    }

    /// Re-registers a run from its files, e.g. after a restart
    pub async fn attach(&self, info: RunInfo) -> Result<(), RunError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&info.run_id) {
            return Ok(());
        }

        // fail early on runs whose files are gone
        status_file::read(&info.status_path).await?;

        debug!(run_id = %info.run_id, "Attached run from files");
        runs.insert(
            info.run_id.clone(),
            Arc::new(RunHandle {
                info,
                source: RunSource::Attached,
            }),
        );
        Ok(())
    }

    pub async fn info(&self, run_id: &str) -> Result<RunInfo, RunError> {
        Ok(self.handle(run_id).await?.info.clone())
    }

    /// Reads complete log lines past `offset`; `limit` 0 means no limit
    pub async fn poll_logs(
        &self,
        run_id: &str,
        offset: u64,
        limit: usize,
    ) -> Result<LogPoll, RunError> {
        let handle = self.handle(run_id).await?;
        let (items, offset) = log_file::read_from(&handle.info.log_path, offset, limit).await?;
        debug!(run_id = %run_id, lines = items.len(), offset, "Polled logs");

        Ok(LogPoll {
            run_id: run_id.to_string(),
            items,
            offset,
        })
    }

    pub async fn get_status(&self, run_id: &str) -> Result<RunStatusReport, RunError> {
        let handle = self.handle(run_id).await?;
        let state = current_state(&handle).await?;

        Ok(RunStatusReport {
            run_id: run_id.to_string(),
            done: state.done,
            exit_code: state.exit_code,
            log_path: handle.info.log_path.clone(),
            status_path: handle.info.status_path.clone(),
        })
    }

    /// Waits until the run is done
    pub async fn wait(&self, run_id: &str) -> Result<RunState, RunError> {
        let handle = self.handle(run_id).await?;
        match &handle.source {
            RunSource::Live { state, .. } => {
                let mut rx = state.clone();
                let result = rx.wait_for(|s| s.done).await.map(|s| *s);
                match result {
                    Ok(state) => Ok(state),
                    // pump is gone; the file holds the final word
                    Err(_) => current_state_from_file(&handle.info.status_path).await,
                }
            }
            RunSource::Attached => current_state_from_file(&handle.info.status_path).await,
        }
    }

    /// Signals the process to terminate
    ///
    /// A run that already exited is not an error.
    pub async fn cancel(&self, run_id: &str) -> Result<RunCancelAck, RunError> {
        let handle = self.handle(run_id).await?;

        match &handle.source {
            RunSource::Live { state, cancel } => {
                if state.borrow().done {
                    debug!(run_id = %run_id, "Cancel requested for finished run");
                } else {
                    info!(run_id = %run_id, "Canceling run");
                    cancel.notify_one();
                }
            }
            RunSource::Attached => {
                debug!(run_id = %run_id, "Cancel requested for attached run, no process to signal");
            }
        }

        Ok(RunCancelAck {
            run_id: run_id.to_string(),
            terminated: true,
        })
    }

    /// Text of the last `n` log lines, for diagnostics
    pub async fn tail(&self, run_id: &str, n: usize) -> Result<Vec<String>, RunError> {
        let handle = self.handle(run_id).await?;
        Ok(log_file::tail(&handle.info.log_path, n).await?)
    }

    async fn handle(&self, run_id: &str) -> Result<Arc<RunHandle>, RunError> {
        self.runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| RunError::NotFound(run_id.to_string()))
    }
}

fn initial_record(info: &RunInfo) -> RunStatusRecord {
    RunStatusRecord {
        run_id: info.run_id.clone(),
        tool: info.tool.clone(),
        done: false,
        exit_code: None,
        started_at: info.started_at,
        finished_at: None,
        terminated: false,
    }
}

async fn current_state(handle: &RunHandle) -> Result<RunState, RunError> {
    match &handle.source {
        RunSource::Live { state, .. } => Ok(*state.borrow()),
        RunSource::Attached => current_state_from_file(&handle.info.status_path).await,
    }
}

async fn current_state_from_file(path: &Path) -> Result<RunState, RunError> {
    let record = status_file::read(path).await?;
    Ok(RunState {
        done: record.done,
        exit_code: record.exit_code,
    })
}

type LineReader<R> = Split<BufReader<R>>;

async fn next_line<R: AsyncRead + Unpin>(reader: &mut Option<LineReader<R>>) -> Option<String> {
    let reader = reader.as_mut()?;
    match reader.next_segment().await {
        Ok(Some(mut bytes)) => {
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Failed to read tool output: {}", e);
            None
        }
    }
}

fn kill(child: &mut Child, run_id: &str) {
    if let Err(e) = child.start_kill() {
        debug!(run_id = %run_id, "Kill failed, process likely exited: {}", e);
    }
}

/// Background task owning one run's process and files
async fn pump(
    mut child: Child,
    info: RunInfo,
    mut log: LogWriter,
    state: watch::Sender<RunState>,
    cancel: Arc<Notify>,
) {
    let mut stdout = child
        .stdout
        .take()
        .map(|s| BufReader::new(s).split(b'\n'));
    let mut stderr = child
        .stderr
        .take()
        .map(|s| BufReader::new(s).split(b'\n'));
    let mut terminated = false;

    while stdout.is_some() || stderr.is_some() {
        let (stream, line) = tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => (LogStream::Stdout, line),
            line = next_line(&mut stderr), if stderr.is_some() => (LogStream::Stderr, line),
            _ = cancel.notified() => {
                terminated = true;
                kill(&mut child, &info.run_id);
                break;
            }
        };

        match line {
            Some(text) => {
                if let Err(e) = log.append(stream, text).await {
                    error!(run_id = %info.run_id, "Failed to write log line: {}", e);
                }
            }
            None => match stream {
                LogStream::Stdout => stdout = None,
                LogStream::Stderr => stderr = None,
            },
        }
    }

    // the process may outlive its pipes
    let waited = if terminated {
        child.wait().await
    } else {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel.notified() => None,
        };
        match exited {
            Some(status) => status,
            None => {
                terminated = true;
                kill(&mut child, &info.run_id);
                child.wait().await
            }
        }
    };

    let exit_code = match waited {
        Ok(status) => status.code(),
        Err(e) => {
            error!(run_id = %info.run_id, "Failed to wait for process: {}", e);
            None
        }
    };

    let mut record = initial_record(&info);
    record.done = true;
    record.exit_code = exit_code;
    record.finished_at = Some(Utc::now());
    record.terminated = terminated;
    if let Err(e) = status_file::write(&info.status_path, &record).await {
        error!(run_id = %info.run_id, "Failed to write status file: {}", e);
    }

    info!(
        run_id = %info.run_id,
        exit_code = ?exit_code,
        lines = log.lines_written(),
        terminated,
        "Run finished"
    );

    // receivers may all be gone; the status file already holds the outcome
    let _ = state.send(RunState {
        done: true,
        exit_code,
    });
}
