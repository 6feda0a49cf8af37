//! Task command handlers
//!
//! Submitting plans, running the worker, and inspecting tasks and their logs.

use anyhow::{Context, Result, bail};
use colored::*;
use conduit_core::domain::run::{LogStream, RunInfo};
use conduit_core::domain::task::{PlannedStep, Step, StepStatus, Task, TaskStatus};
use conduit_core::dto::task::CreateTask;
use conduit_orchestrator::TaskScheduler;
use conduit_orchestrator::service::task_service;
use conduit_planner::catalog::ToolCatalog;
use conduit_planner::policy::validate_plan;
use conduit_planner::{CompiledPlan, PlannerConfig};
use conduit_runs::RunManager;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::id_resolver::resolve_task_id;
use crate::types::IdOrPrefix;

/// Plan files hold either a compiled plan or a bare step list
#[derive(Deserialize)]
#[serde(untagged)]
enum PlanFile {
    Plan(CompiledPlan),
    Steps(Vec<PlannedStep>),
}

async fn open(config: &Config) -> Result<Arc<TaskScheduler>> {
    conduit_orchestrator::open(&config.orchestrator)
        .await
        .context("Failed to open the orchestrator")
}

/// Read a plan file and hold it to the same contract as a compiled plan
fn load_plan(scheduler: &TaskScheduler, path: &Path) -> Result<Vec<PlannedStep>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    let steps = match serde_json::from_str::<PlanFile>(&raw)
        .with_context(|| format!("Plan {} is not valid JSON", path.display()))?
    {
        PlanFile::Plan(plan) => plan.steps,
        PlanFile::Steps(steps) => steps,
    };

    let planner = PlannerConfig::from_env().context("Invalid planner configuration")?;
    let catalog = ToolCatalog::new(scheduler.list_tools());

    match validate_plan(
        steps,
        &catalog,
        planner.param_policy,
        planner.dataset_allow_list.as_ref(),
    ) {
        Ok(steps) => Ok(steps),
        Err(errors) => {
            eprintln!("{}", "Plan is invalid:".red().bold());
            for error in errors.errors() {
                eprintln!("  {} {}", "✗".red(), error);
            }
            bail!("plan {} rejected", path.display());
        }
    }
}

pub async fn submit(config: &Config, plan: &Path, check_tools: bool) -> Result<()> {
    let scheduler = open(config).await?;
    let steps = load_plan(&scheduler, plan)?;

    let created = scheduler
        .create_task(CreateTask {
            user_uid: config.user_uid.clone(),
            steps,
            check_tools,
        })
        .await?;

    println!(
        "{} Task {} queued",
        "✓".green(),
        created.task_uid.to_string().cyan()
    );
    println!(
        "  {}",
        "Run `conduit worker` to execute queued tasks.".dimmed()
    );
    Ok(())
}

pub async fn run(config: &Config, plan: &Path) -> Result<()> {
    let scheduler = open(config).await?;
    let steps = load_plan(&scheduler, plan)?;

    let _worker = scheduler.start().await?;
    let created = scheduler
        .create_task(CreateTask {
            user_uid: config.user_uid.clone(),
            steps,
            check_tools: true,
        })
        .await?;

    println!(
        "{} Task {} started",
        "▸".cyan(),
        created.task_uid.to_string().cyan()
    );

    let task = follow(&scheduler, created.task_uid, None, config.orchestrator.poll_interval).await?;
    println!();
    print_task_details(&task);

    if task.status != TaskStatus::Succeeded {
        bail!("task {} ended {}", task.task_uid, task.status);
    }
    Ok(())
}

pub async fn worker(config: &Config) -> Result<()> {
    let scheduler = open(config).await?;
    let handle = scheduler.start().await?;

    println!(
        "{} Worker started, executing queued tasks (Ctrl-C to stop)",
        "▸".cyan()
    );

    tokio::select! {
        result = handle => {
            result.context("Worker stopped unexpectedly")?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!("{}", "Worker stopping; a running task will be marked interrupted on next start.".yellow());
        }
    }
    Ok(())
}

pub async fn status(config: &Config, id: &str) -> Result<()> {
    let scheduler = open(config).await?;
    let task_uid = resolve_task_id(&scheduler, &config.user_uid, &IdOrPrefix::parse(id)).await?;
    let task = scheduler.get_task_status(task_uid).await?;
    print_task_details(&task);
    Ok(())
}

pub async fn list(config: &Config) -> Result<()> {
    let scheduler = open(config).await?;
    let tasks = task_service::list_tasks(scheduler.pool(), &config.user_uid).await?;

    if tasks.is_empty() {
        println!("{}", "No tasks found.".yellow());
    } else {
        println!("{}", format!("Found {} task(s):", tasks.len()).bold());
        println!();
        for task in tasks {
            print_task_summary(&task);
        }
    }
    Ok(())
}

pub async fn logs(config: &Config, id: &str, step: Option<u32>, follow_logs: bool) -> Result<()> {
    let scheduler = open(config).await?;
    let task_uid = resolve_task_id(&scheduler, &config.user_uid, &IdOrPrefix::parse(id)).await?;

    if follow_logs {
        follow(&scheduler, task_uid, step, config.orchestrator.poll_interval).await?;
        return Ok(());
    }

    let task = scheduler.get_task_status(task_uid).await?;
    let mut offsets = HashMap::new();
    let mut printed = false;
    for s in task.steps.iter().filter(|s| step.is_none_or(|n| n == s.step_number)) {
        printed |= print_new_lines(scheduler.runs(), &task, s, &mut offsets).await?;
    }
    if !printed {
        println!("{}", "No logs found for this task.".yellow());
    }
    Ok(())
}

pub async fn cancel(config: &Config, id: &str) -> Result<()> {
    let scheduler = open(config).await?;
    let task_uid = resolve_task_id(&scheduler, &config.user_uid, &IdOrPrefix::parse(id)).await?;
    let ack = scheduler.cancel_task(task_uid).await?;

    match ack.status {
        TaskStatus::Canceled if ack.run_terminated => {
            println!("{} Task {} canceled, run terminated", "✓".green(), task_uid);
        }
        TaskStatus::Canceled => {
            println!("{} Task {} canceled", "✓".green(), task_uid);
        }
        other => {
            println!(
                "{} Task {} already {}",
                "•".yellow(),
                task_uid,
                colorize_status(other)
            );
        }
    }
    Ok(())
}

/// Stream the logs of a task's runs until it reaches a terminal status
async fn follow(
    scheduler: &TaskScheduler,
    task_uid: Uuid,
    only_step: Option<u32>,
    poll: Duration,
) -> Result<Task> {
    let mut offsets = HashMap::new();
    let mut interval = tokio::time::interval(poll);

    loop {
        interval.tick().await;
        let task = scheduler.get_task_status(task_uid).await?;

        for step in task
            .steps
            .iter()
            .filter(|s| only_step.is_none_or(|n| n == s.step_number))
        {
            print_new_lines(scheduler.runs(), &task, step, &mut offsets).await?;
        }

        if task.status.is_terminal() {
            return Ok(task);
        }
    }
}

/// Print log lines of a step's run past the last printed offset
///
/// Runs launched by another process are attached from their files first.
async fn print_new_lines(
    runs: &RunManager,
    task: &Task,
    step: &Step,
    offsets: &mut HashMap<String, u64>,
) -> Result<bool> {
    let Some(run_id) = &step.run_id else {
        return Ok(false);
    };

    if runs.info(run_id).await.is_err() {
        let (Some(log_path), Some(status_path)) = (&step.log_path, &step.status_path) else {
            return Ok(false);
        };
        runs.attach(RunInfo {
            run_id: run_id.clone(),
            tool: step.tool_name.clone(),
            log_path: PathBuf::from(log_path),
            status_path: PathBuf::from(status_path),
            started_at: step.started_at.unwrap_or(task.created_at),
        })
        .await
        .with_context(|| format!("Failed to open logs of run {}", run_id))?;
    }

    let offset = offsets.entry(run_id.clone()).or_insert(0);
    let poll = runs.poll_logs(run_id, *offset, 0).await?;
    *offset = poll.offset;

    let label = format!("[{} {}]", step.step_number, step.tool_name);
    for line in &poll.items {
        match line.stream {
            LogStream::Stdout => println!("{} {}", label.dimmed(), line.text),
            LogStream::Stderr => println!("{} {}", label.dimmed(), line.text.yellow()),
        }
    }
    Ok(!poll.items.is_empty())
}

fn colorize_status(status: TaskStatus) -> ColoredString {
    match status {
        TaskStatus::Queued => "queued".yellow(),
        TaskStatus::Running => "running".blue(),
        TaskStatus::Succeeded => "succeeded".green(),
        TaskStatus::Failed => "failed".red(),
        TaskStatus::Canceled => "canceled".magenta(),
    }
}

fn colorize_step_status(status: StepStatus) -> ColoredString {
    match status {
        StepStatus::Queued => "queued".dimmed(),
        StepStatus::Running => "running".blue(),
        StepStatus::Succeeded => "succeeded".green(),
        StepStatus::Failed => "failed".red(),
    }
}

fn print_task_summary(task: &Task) {
    println!("  {} Task {}", "▸".cyan(), task.task_uid.to_string().dimmed());
    println!("    Status:   {}", colorize_status(task.status));
    println!(
        "    Progress: {}/{} step(s)",
        task.last_completed_step, task.total_steps
    );
    println!(
        "    Created:  {}",
        task.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_task_details(task: &Task) {
    println!("{}", "Task Details:".bold());
    println!("  ID:        {}", task.task_uid.to_string().cyan());
    println!("  User:      {}", task.user_uid);
    println!("  Status:    {}", colorize_status(task.status));
    println!(
        "  Progress:  {}/{} step(s)",
        task.last_completed_step, task.total_steps
    );
    println!("  Created:   {}", task.created_at.format("%Y-%m-%d %H:%M:%S"));

    if let Some(started) = task.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(finished) = task.finished_at {
        println!("  Finished:  {}", finished.format("%Y-%m-%d %H:%M:%S"));
        if let Some(started) = task.started_at {
            let seconds = finished.signed_duration_since(started).num_seconds();
            println!("  Duration:  {}s", seconds);
        }
    }

    if let Some(failure) = &task.failure {
        println!("\n{}", "Failure:".bold());
        if let Some(n) = task.failed_step_number {
            println!("  Step:      {}", n);
        }
        println!("  Stage:     {}", failure.stage.to_string().red());
        for line in failure.message.lines() {
            println!("  {}", line.dimmed());
        }
    }

    if !task.steps.is_empty() {
        println!("\n{}", "Steps:".bold());
        for step in &task.steps {
            println!(
                "  {}. {} {}",
                step.step_number,
                step.tool_name.cyan(),
                colorize_step_status(step.status)
            );
            if let Some(purpose) = &step.purpose {
                println!("     {}", purpose.dimmed());
            }
            if let Some(run_id) = &step.run_id {
                println!("     run:    {}", run_id.dimmed());
            }
            if let Some(dir) = &step.output_dir {
                println!("     output: {}", dir.dimmed());
            }
            if let Some(code) = step.exit_code {
                println!("     exit:   {}", code);
            }
        }
    }
}
