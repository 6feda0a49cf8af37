//! Plan compiler
//!
//! Two ordered stages, each retried on its own:
//!
//! 1. Skeleton: which tools run, in which order ([`crate::skeleton`]).
//! 2. Parameters: one LLM answer per agent-filled parameter ([`crate::params`]).
//!
//! The assembled plan is passed through [`validate_plan`] before it is
//! returned, so a compiled plan always satisfies the same contract as a
//! validated hand-written one. Nothing is persisted here.

use conduit_core::domain::task::PlannedStep;
use conduit_core::domain::tool::ToolSpec;
use conduit_core::domain::value::StepArgs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::catalog::ToolCatalog;
use crate::config::PlannerConfig;
use crate::error::{CompileError, CompileErrors};
use crate::llm::LlmProvider;
use crate::params::{ParamContext, ParamPlanner};
use crate::policy::validate_plan;
use crate::skeleton::SkeletonPlanner;

/// Validated, executable step list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPlan {
    pub steps: Vec<PlannedStep>,
}

pub struct PlanCompiler {
    skeleton: SkeletonPlanner,
    params: ParamPlanner,
    config: PlannerConfig,
}

impl PlanCompiler {
    pub fn new(llm: Arc<dyn LlmProvider>, config: PlannerConfig) -> Self {
        let skeleton = SkeletonPlanner::new(
            Arc::clone(&llm),
            config.max_retries,
            config.temperature,
            config.prompt_tools_limit,
        );
        let params = ParamPlanner::new(
            llm,
            config.max_retries,
            config.temperature,
            config.dataset_allow_list.clone(),
        );
        Self {
            skeleton,
            params,
            config,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Compiles a natural-language intent into a validated plan
    ///
    /// # Errors
    /// - `Validation` if there is nothing to plan with, or the assembled plan
    ///   breaks the output contract
    /// - `StepPlan` if no acceptable skeleton was produced
    /// - `ParamPlan` if a required parameter could not be planned
    /// - `Connectivity` if the LLM backend failed
    pub async fn compile(
        &self,
        tool_catalog: &[ToolSpec],
        allowed_tools: &BTreeSet<String>,
        intent: &str,
    ) -> Result<CompiledPlan, CompileErrors> {
        if intent.trim().is_empty() {
            return Err(CompileError::Validation("intent is empty".to_string()).into());
        }

        let catalog = ToolCatalog::restricted(tool_catalog, allowed_tools);
        if catalog.is_empty() {
            return Err(CompileError::Validation(
                "none of the allowed tools are in the catalog".to_string(),
            )
            .into());
        }

        let skeleton = self.skeleton.plan(&catalog, intent).await?;

        let mut steps = Vec::with_capacity(skeleton.len());
        for step in &skeleton {
            let tool = catalog.get(&step.tool_name).ok_or_else(|| {
                CompileError::Validation(format!("tool '{}' vanished from catalog", step.tool_name))
            })?;

            let ctx = ParamContext {
                intent,
                skeleton: &skeleton,
                step,
                tool,
            };

            let mut args = StepArgs::new();
            for param in tool.agent_params() {
                if let Some(value) = self.params.plan(ctx, param).await? {
                    args.insert(param.name.clone(), value);
                }
            }

            steps.push(PlannedStep {
                step_number: step.step_number,
                tool_name: step.tool_name.clone(),
                args,
                purpose: Some(step.purpose.clone()),
            });
        }

        let steps = validate_plan(
            steps,
            &catalog,
            self.config.param_policy,
            self.config.dataset_allow_list.as_ref(),
        )?;

        info!(steps = steps.len(), "Compiled plan");
        Ok(CompiledPlan { steps })
    }

    /// Validates a plan that did not come from [`PlanCompiler::compile`]
    pub fn validate(
        &self,
        steps: Vec<PlannedStep>,
        tool_catalog: &[ToolSpec],
    ) -> Result<CompiledPlan, CompileErrors> {
        let catalog = ToolCatalog::new(tool_catalog.iter().cloned());
        let steps = validate_plan(
            steps,
            &catalog,
            self.config.param_policy,
            self.config.dataset_allow_list.as_ref(),
        )?;
        Ok(CompiledPlan { steps })
    }
}
