//! Tool listing and plan compilation

use anyhow::{Context, Result, bail};
use colored::*;
use conduit_core::domain::tool::{FilledBy, ToolSpec};
use conduit_planner::{ChatClient, PlanCompiler, PlannerConfig};
use conduit_runs::ToolRegistry;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;

fn load_registry(config: &Config) -> Result<ToolRegistry> {
    ToolRegistry::from_file(&config.orchestrator.tools_file).with_context(|| {
        format!(
            "Failed to load tools from {}",
            config.orchestrator.tools_file.display()
        )
    })
}

pub async fn list_tools(config: &Config) -> Result<()> {
    let registry = load_registry(config)?;
    let specs = registry.specs();

    if specs.is_empty() {
        println!("{}", "No tools registered.".yellow());
        return Ok(());
    }

    println!("{}", format!("Found {} tool(s):", specs.len()).bold());
    println!();
    for spec in &specs {
        print_tool(spec);
    }
    Ok(())
}

fn print_tool(spec: &ToolSpec) {
    println!("  {} {}", "▸".cyan(), spec.name.bold());
    if !spec.description.is_empty() {
        println!("    {}", spec.description.dimmed());
    }
    for param in &spec.params {
        let mut flags = Vec::new();
        if param.required {
            flags.push("required".to_string());
        }
        if param.is_list {
            flags.push("list".to_string());
        }
        if param.input {
            flags.push("input".to_string());
        }
        if param.filled_by == FilledBy::Scheduler {
            flags.push("scheduler".to_string());
        }
        if param.allow_ref {
            let kinds: Vec<String> = param.ref_kinds.iter().map(|k| k.to_string()).collect();
            flags.push(format!("refs: {}", kinds.join("|")));
        }
        println!(
            "    {} {} {}",
            param.name.cyan(),
            param.param_type,
            format!("[{}]", flags.join(", ")).dimmed()
        );
    }
    println!();
}

pub async fn compile_plan(
    config: &Config,
    intent: &str,
    tools: Vec<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let registry = load_registry(config)?;

    let planner_config = PlannerConfig::from_env().context("Invalid planner configuration")?;
    planner_config
        .validate()
        .context("Invalid planner configuration")?;
    let client = ChatClient::from_env().context("LLM client is not configured")?;

    let allowed: BTreeSet<String> = if tools.is_empty() {
        registry.names()
    } else {
        tools.into_iter().collect()
    };

    let compiler = PlanCompiler::new(Arc::new(client), planner_config);
    let plan = match compiler.compile(&registry.specs(), &allowed, intent).await {
        Ok(plan) => plan,
        Err(errors) => {
            eprintln!("{}", "Plan compilation failed:".red().bold());
            for error in errors.errors() {
                eprintln!("  {} {}", "✗".red(), error);
            }
            bail!("could not compile a plan");
        }
    };

    let json = serde_json::to_string_pretty(&plan)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!(
                "{} Plan with {} step(s) written to {}",
                "✓".green(),
                plan.steps.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
