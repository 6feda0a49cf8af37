//! Task scheduler
//!
//! A single background worker drains a FIFO queue of task UIDs and runs one
//! task at a time, its steps strictly in order. The worker is the only writer
//! of task and step execution state.
//!
//! Per step:
//! 1. Resolve every reference in the step's arguments
//! 2. Launch the tool with the resolved input and a fresh output directory
//! 3. Poll the run until it is done, forwarding a cancel if the task's
//!    persisted status turns `canceled`
//! 4. Record the outcome and either continue or stop the task

use conduit_core::domain::reference::RefKind;
use conduit_core::domain::run::RunState;
use conduit_core::domain::task::{FailureStage, Step, Task, TaskFailure, TaskStatus};
use conduit_core::domain::tool::{
    OUT_DIR_PARAM, STEP_NUMBER_PARAM, TASK_UID_PARAM, ToolSpec, WORK_DIR_PARAM,
};
use conduit_core::domain::value::{ArgItem, ArgValue};
use conduit_core::dto::task::{CancelTaskAck, CreateTask, TaskCreated};
use conduit_core::resolver::{ReferenceResolver, ResolutionError, ResolveContext};
use conduit_runs::{LaunchRequest, RunManager};
use serde_json::Value as JsonValue;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::SchedulerError;
use crate::repository::{step_repository, task_repository};
use crate::service::catalog::SqlDatasetCatalog;
use crate::service::task as task_service;

const OUTPUT_DIR: &str = "output";

/// What startup recovery found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Tasks that were running when the previous worker stopped
    pub interrupted: usize,
    /// Queued tasks put back on the queue
    pub requeued: usize,
}

enum StepOutcome {
    Succeeded(PathBuf),
    Stopped,
}

pub struct TaskScheduler {
    pool: SqlitePool,
    runs: Arc<RunManager>,
    resolver: ReferenceResolver,
    workspace_root: PathBuf,
    poll_interval: Duration,
    log_tail_lines: usize,
    queue: mpsc::UnboundedSender<Uuid>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
}

impl TaskScheduler {
    pub fn new(pool: SqlitePool, runs: Arc<RunManager>, config: &OrchestratorConfig) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let resolver = ReferenceResolver::new(Arc::new(SqlDatasetCatalog::new(pool.clone())));

        Self {
            pool,
            runs,
            resolver,
            workspace_root: config.workspace_root.clone(),
            poll_interval: config.poll_interval,
            log_tail_lines: config.log_tail_lines,
            queue,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn runs(&self) -> &Arc<RunManager> {
        &self.runs
    }

    /// Persist a task and queue it for execution; does not wait for it to run
    pub async fn create_task(&self, req: CreateTask) -> Result<TaskCreated, SchedulerError> {
        let task = task_service::create_task(&self.pool, self.runs.tools(), req).await?;
        self.enqueue(task.task_uid);
        Ok(TaskCreated {
            task_uid: task.task_uid,
        })
    }

    pub async fn get_task_status(&self, task_uid: Uuid) -> Result<Task, SchedulerError> {
        task_service::get_task_status(&self.pool, task_uid).await
    }

    pub fn list_tools(&self) -> Vec<ToolSpec> {
        task_service::list_tools(self.runs.tools())
    }

    pub async fn cancel_task(&self, task_uid: Uuid) -> Result<CancelTaskAck, SchedulerError> {
        task_service::cancel_task(&self.pool, &self.runs, task_uid).await
    }

    /// Path of a step's working directory; its output lives in `output/` below it
    pub fn step_dir(&self, user_uid: &str, task_uid: Uuid, step_uid: Uuid) -> PathBuf {
        self.workspace_root
            .join(user_uid)
            .join(task_uid.to_string())
            .join(step_uid.to_string())
    }

    fn enqueue(&self, task_uid: Uuid) {
        if self.queue.send(task_uid).is_err() {
            // receiver lives in the scheduler or its worker; only reachable after a worker panic
            error!(task_uid = %task_uid, "Task queue closed, task stays queued until restart");
        }
    }

    /// Settle state left behind by a previous worker
    ///
    /// Running tasks are failed as interrupted; queued tasks are re-enqueued
    /// in creation order.
    pub async fn recover(&self) -> Result<Recovery, SchedulerError> {
        let mut recovery = Recovery::default();

        for task in task_repository::find_by_status(&self.pool, TaskStatus::Running).await? {
            step_repository::fail_running(
                &self.pool,
                task.task_uid,
                "interrupted by scheduler restart",
            )
            .await?;

            let failed_step = task.current_step_number.zip(task.current_step_uid);
            let failure = TaskFailure {
                stage: FailureStage::Interrupted,
                message: "scheduler stopped while the task was running".to_string(),
            };
            if task_repository::mark_failed(&self.pool, task.task_uid, failed_step, &failure).await? {
                warn!(task_uid = %task.task_uid, "Marked interrupted task as failed");
                recovery.interrupted += 1;
            }
        }

        for task in task_repository::find_by_status(&self.pool, TaskStatus::Queued).await? {
            self.enqueue(task.task_uid);
            recovery.requeued += 1;
        }

        Ok(recovery)
    }

    /// Recover persisted state and start the background worker
    ///
    /// # Errors
    /// Returns `AlreadyStarted` on a second call.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, SchedulerError> {
        let mut receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or(SchedulerError::AlreadyStarted)?;

        let recovery = self.recover().await?;
        info!(
            interrupted = recovery.interrupted,
            requeued = recovery.requeued,
            "Starting task scheduler"
        );

        let scheduler = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(task_uid) = receiver.recv().await {
                if let Err(e) = scheduler.execute_task(task_uid).await {
                    error!(task_uid = %task_uid, error = %e, "Task execution aborted");
                    if let Err(e) = scheduler.abort_task(task_uid, &e).await {
                        error!(task_uid = %task_uid, error = %e, "Failed to record aborted task");
                    }
                }
            }
        }))
    }

    /// Fail a task whose execution stopped on a worker error
    ///
    /// Only a task still `running` is touched; a cancel written meanwhile wins.
    async fn abort_task(&self, task_uid: Uuid, cause: &SchedulerError) -> Result<(), SchedulerError> {
        let message = cause.to_string();
        step_repository::fail_running(&self.pool, task_uid, &message).await?;

        let failed_step = task_repository::find_by_id(&self.pool, task_uid)
            .await?
            .and_then(|t| t.current_step_number.zip(t.current_step_uid));
        let failure = TaskFailure {
            stage: FailureStage::Internal,
            message: format!("scheduler error: {}", message),
        };
        if task_repository::mark_failed(&self.pool, task_uid, failed_step, &failure).await? {
            warn!(task_uid = %task_uid, "Marked aborted task as failed");
        }
        Ok(())
    }

    /// Run one task to a terminal state
    async fn execute_task(&self, task_uid: Uuid) -> Result<(), SchedulerError> {
        let Some(task) = task_repository::find_by_id(&self.pool, task_uid).await? else {
            warn!(task_uid = %task_uid, "Dequeued unknown task");
            return Ok(());
        };

        if task.status != TaskStatus::Queued || !task_repository::mark_running(&self.pool, task_uid).await? {
            debug!(task_uid = %task_uid, status = %task.status, "Skipping task that is no longer queued");
            return Ok(());
        }

        info!(task_uid = %task_uid, steps = task.total_steps, "Task started");

        let steps = step_repository::find_by_task(&self.pool, task_uid).await?;
        let mut outputs = BTreeMap::new();

        for step in &steps {
            match self.execute_step(&task, step, &outputs).await? {
                StepOutcome::Succeeded(output_dir) => {
                    outputs.insert(step.step_number, output_dir);
                }
                StepOutcome::Stopped => return Ok(()),
            }
        }

        if task_repository::mark_succeeded(&self.pool, task_uid).await? {
            info!(task_uid = %task_uid, "Task succeeded");
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        task: &Task,
        step: &Step,
        outputs: &BTreeMap<u32, PathBuf>,
    ) -> Result<StepOutcome, SchedulerError> {
        if self.is_canceled(task.task_uid).await? {
            return Ok(StepOutcome::Stopped);
        }

        let step_dir = self.step_dir(&task.user_uid, task.task_uid, step.step_uid);
        let output_dir = step_dir.join(OUTPUT_DIR);

        let ctx = ResolveContext {
            user_uid: task.user_uid.clone(),
            task_uid: task.task_uid,
            current_step: step.step_number,
            prior_outputs: outputs.clone(),
        };

        let request = match self.prepare_launch(step, &ctx, &step_dir, &output_dir).await {
            Ok(request) => request.with_run_root(&step_dir),
            Err(e) => {
                warn!(task_uid = %task.task_uid, step = step.step_number, error = %e, "Reference resolution failed");
                self.fail_step(task, step, None, FailureStage::Resolution, e.to_string())
                    .await?;
                return Ok(StepOutcome::Stopped);
            }
        };

        if !task_repository::set_current_step(&self.pool, task.task_uid, step.step_number, step.step_uid)
            .await?
        {
            return Ok(StepOutcome::Stopped);
        }
        step_repository::mark_running(&self.pool, step.step_uid, &output_dir).await?;

        let run = match self.runs.launch(request).await {
            Ok(run) => run,
            Err(e) => {
                error!(task_uid = %task.task_uid, step = step.step_number, error = %e, "Launch failed");
                self.fail_step(task, step, None, FailureStage::Launch, e.to_string())
                    .await?;
                return Ok(StepOutcome::Stopped);
            }
        };
        step_repository::record_run(&self.pool, step.step_uid, &run).await?;

        info!(
            task_uid = %task.task_uid,
            step = step.step_number,
            tool = %step.tool_name,
            run_id = %run.run_id,
            "Step started"
        );

        let state = match self.watch_run(task.task_uid, &run.run_id).await {
            Ok(state) => state,
            Err(e) => {
                // nothing will watch the run anymore
                if let Err(cancel_err) = self.runs.cancel(&run.run_id).await {
                    warn!(run_id = %run.run_id, error = %cancel_err, "Failed to stop unwatched run");
                }
                return Err(e);
            }
        };

        if state.succeeded() {
            step_repository::mark_succeeded(&self.pool, step.step_uid, state.exit_code).await?;
            if !task_repository::record_step_completed(&self.pool, task.task_uid, step.step_number).await? {
                return Ok(StepOutcome::Stopped);
            }
            info!(task_uid = %task.task_uid, step = step.step_number, "Step succeeded");
            return Ok(StepOutcome::Succeeded(output_dir));
        }

        let tail = self
            .runs
            .tail(&run.run_id, self.log_tail_lines)
            .await
            .unwrap_or_default();
        let message = failure_message(state.exit_code, &tail);
        self.fail_step(task, step, state.exit_code, FailureStage::Run, message)
            .await?;
        Ok(StepOutcome::Stopped)
    }

    /// Build the launch request, resolving references to concrete paths
    ///
    /// The tool's input parameter becomes the run's input directory; other
    /// references are passed as path-valued parameters. Scheduler-filled
    /// parameters are set last and override anything the plan carried.
    async fn prepare_launch(
        &self,
        step: &Step,
        ctx: &ResolveContext,
        step_dir: &Path,
        output_dir: &Path,
    ) -> Result<LaunchRequest, ResolutionError> {
        let spec = self.runs.tools().spec(&step.tool_name);
        let input_param = spec.and_then(ToolSpec::input_param).map(|p| p.name.as_str());

        let mut request = LaunchRequest::new(&step.tool_name, output_dir);

        for (name, value) in &step.args {
            let is_input = input_param == Some(name.as_str());

            match value {
                ArgValue::Literal(literal) if is_input => {
                    request = request.with_in_dir(literal.render());
                }
                ArgValue::Literal(literal) => {
                    request = request.with_param(name, literal.to_json());
                }
                ArgValue::Ref(reference) => {
                    let path = self.resolve(reference, ctx).await?;
                    request = if is_input {
                        request.with_in_dir(path)
                    } else {
                        request.with_param(name, path_json(&path))
                    };
                }
                ArgValue::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(match item {
                            ArgItem::Literal(literal) => literal.to_json(),
                            ArgItem::Ref(reference) => path_json(&self.resolve(reference, ctx).await?),
                        });
                    }
                    request = request.with_param(name, JsonValue::Array(values));
                }
            }
        }

        for param in spec.into_iter().flat_map(|s| s.scheduler_params()) {
            let value = match param.name.as_str() {
                // always passed as --out-dir
                OUT_DIR_PARAM => continue,
                WORK_DIR_PARAM => path_json(step_dir),
                TASK_UID_PARAM => JsonValue::String(ctx.task_uid.to_string()),
                STEP_NUMBER_PARAM => JsonValue::from(step.step_number),
                other => {
                    // tool specs reject any other scheduler-filled name when parsed
                    warn!(tool = %step.tool_name, param = %other, "No value for scheduler-filled parameter");
                    continue;
                }
            };
            request = request.with_param(&param.name, value);
        }

        Ok(request)
    }

    async fn resolve(&self, reference: &RefKind, ctx: &ResolveContext) -> Result<PathBuf, ResolutionError> {
        let path = self.resolver.resolve(reference, ctx).await?;
        debug!(reference = %reference, path = %path.display(), "Resolved reference");
        Ok(path)
    }

    /// Poll a run until it is done
    ///
    /// The task's persisted status is re-read on every tick so a cancel
    /// written by any process reaches the run.
    async fn watch_run(&self, task_uid: Uuid, run_id: &str) -> Result<RunState, SchedulerError> {
        let mut interval = time::interval(self.poll_interval);
        let mut cancel_sent = false;

        loop {
            interval.tick().await;

            let report = self.runs.get_status(run_id).await?;
            if report.done {
                return Ok(RunState {
                    done: true,
                    exit_code: report.exit_code,
                });
            }

            if !cancel_sent && self.is_canceled(task_uid).await? {
                info!(task_uid = %task_uid, run_id = %run_id, "Forwarding cancel to run");
                self.runs.cancel(run_id).await?;
                cancel_sent = true;
            }
        }
    }

    async fn is_canceled(&self, task_uid: Uuid) -> Result<bool, SchedulerError> {
        Ok(task_repository::find_status(&self.pool, task_uid).await? == Some(TaskStatus::Canceled))
    }

    /// Fail a step and, unless it was canceled meanwhile, its task
    async fn fail_step(
        &self,
        task: &Task,
        step: &Step,
        exit_code: Option<i32>,
        stage: FailureStage,
        message: String,
    ) -> Result<(), SchedulerError> {
        step_repository::mark_failed(&self.pool, step.step_uid, exit_code, &message).await?;

        let failure = TaskFailure {
            stage,
            message: format!("step {} ({}): {}", step.step_number, step.tool_name, message),
        };
        let failed = task_repository::mark_failed(
            &self.pool,
            task.task_uid,
            Some((step.step_number, step.step_uid)),
            &failure,
        )
        .await?;

        if failed {
            error!(
                task_uid = %task.task_uid,
                step = step.step_number,
                stage = %stage,
                "Task failed"
            );
        } else {
            info!(task_uid = %task.task_uid, step = step.step_number, "Step stopped after cancel");
        }
        Ok(())
    }
}

fn path_json(path: &Path) -> JsonValue {
    JsonValue::String(path.to_string_lossy().into_owned())
}

fn failure_message(exit_code: Option<i32>, tail: &[String]) -> String {
    let head = match exit_code {
        Some(code) => format!("tool exited with code {}", code),
        None => "tool terminated abnormally".to_string(),
    };
    if tail.is_empty() {
        head
    } else {
        format!("{}\n{}", head, tail.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_includes_tail() {
        let tail = vec!["reading input".to_string(), "boom".to_string()];
        assert_eq!(
            failure_message(Some(2), &tail),
            "tool exited with code 2\nreading input\nboom"
        );
        assert_eq!(failure_message(None, &[]), "tool terminated abnormally");
    }
}
