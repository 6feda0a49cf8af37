//! Step skeleton planning
//!
//! Fixes the shape of the pipeline: which tools run, in which order, and
//! why. Parameters are decided later, one at a time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use conduit_core::domain::task::check_step_numbers;

use crate::catalog::ToolCatalog;
use crate::error::CompileError;
use crate::extract::StructuredAnswerExtractor;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::prompts::{RETRY_SUFFIX, SKELETON_PROMPT, SKELETON_SYSTEM_PROMPT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonStep {
    pub step_number: u32,
    pub tool_name: String,
    #[serde(default)]
    pub purpose: String,
}

#[derive(Debug, Deserialize)]
struct SkeletonAnswer {
    steps: Vec<SkeletonStep>,
}

/// Validates a planned skeleton and returns it ordered by step number
pub fn validate_skeleton(
    mut steps: Vec<SkeletonStep>,
    allowed: &BTreeSet<String>,
) -> Result<Vec<SkeletonStep>, String> {
    let numbers: Vec<u32> = steps.iter().map(|s| s.step_number).collect();
    check_step_numbers(&numbers)?;

    for step in &steps {
        if !allowed.contains(&step.tool_name) {
            return Err(format!(
                "step {} uses tool '{}', which is not available",
                step.step_number, step.tool_name
            ));
        }
        if step.purpose.trim().is_empty() {
            return Err(format!("step {} has an empty purpose", step.step_number));
        }
    }

    steps.sort_by_key(|s| s.step_number);
    Ok(steps)
}

pub struct SkeletonPlanner {
    llm: Arc<dyn LlmProvider>,
    extractor: StructuredAnswerExtractor,
    max_attempts: u32,
    temperature: f64,
    tools_limit: usize,
}

impl SkeletonPlanner {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        max_attempts: u32,
        temperature: f64,
        tools_limit: usize,
    ) -> Self {
        Self {
            llm,
            extractor: StructuredAnswerExtractor::new(),
            max_attempts: max_attempts.max(1),
            temperature,
            tools_limit,
        }
    }

    pub async fn plan(
        &self,
        catalog: &ToolCatalog,
        intent: &str,
    ) -> Result<Vec<SkeletonStep>, CompileError> {
        let base_prompt = SKELETON_PROMPT
            .replace("{tools}", &catalog.summary(self.tools_limit))
            .replace("{intent}", intent.trim());
        let allowed = catalog.names();

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            let mut prompt = base_prompt.clone();
            if attempt > 1 {
                prompt.push_str(&RETRY_SUFFIX.replace("{error}", &last_error));
            }

            let request = GenerationRequest::new(
                "",
                vec![Message::system(SKELETON_SYSTEM_PROMPT), Message::user(prompt)],
            )
            .with_temperature(self.temperature)
            .with_json_mode();

            let response = self.llm.generate(request).await?;

            let outcome = self
                .extractor
                .extract::<SkeletonAnswer>(&response)
                .map_err(|e| e.to_string())
                .and_then(|answer| validate_skeleton(answer.steps, &allowed));

            match outcome {
                Ok(steps) => {
                    info!(steps = steps.len(), attempt, "Planned step skeleton");
                    return Ok(steps);
                }
                Err(e) => {
                    warn!(attempt, "Rejected step skeleton: {}", e);
                    last_error = e;
                }
            }
        }

        debug!("Step skeleton planning exhausted {} attempt(s)", self.max_attempts);
        Err(CompileError::StepPlan {
            attempts: self.max_attempts,
            reason: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn step(n: u32, tool: &str) -> SkeletonStep {
        SkeletonStep {
            step_number: n,
            tool_name: tool.to_string(),
            purpose: format!("run {}", tool),
        }
    }

    fn allowed() -> BTreeSet<String> {
        BTreeSet::from(["ingest".to_string(), "train".to_string()])
    }

    #[test]
    fn test_valid_skeleton_is_sorted() {
        let steps = validate_skeleton(vec![step(2, "train"), step(1, "ingest")], &allowed()).unwrap();
        assert_eq!(steps[0].tool_name, "ingest");
        assert_eq!(steps[1].step_number, 2);
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let err = validate_skeleton(vec![step(1, "deploy")], &allowed()).unwrap_err();
        assert!(err.contains("not available"));
    }

    #[test]
    fn test_empty_purpose_rejected() {
        let mut s = step(1, "ingest");
        s.purpose = "  ".to_string();
        assert!(validate_skeleton(vec![s], &allowed()).is_err());
    }

    proptest! {
        #[test]
        fn test_accepted_skeletons_are_exactly_one_to_n(
            numbers in proptest::collection::vec(0u32..8, 0..8),
        ) {
            let steps: Vec<SkeletonStep> = numbers.iter().map(|n| step(*n, "ingest")).collect();
            let mut expected: Vec<u32> = numbers.clone();
            expected.sort_unstable();
            let contiguous = !expected.is_empty()
                && expected.iter().copied().eq(1..=expected.len() as u32);

            match validate_skeleton(steps, &allowed()) {
                Ok(valid) => {
                    prop_assert!(contiguous);
                    let got: Vec<u32> = valid.iter().map(|s| s.step_number).collect();
                    prop_assert_eq!(got, (1..=numbers.len() as u32).collect::<Vec<_>>());
                }
                Err(_) => prop_assert!(!contiguous),
            }
        }

        #[test]
        fn test_shuffled_contiguous_skeletons_are_accepted(n in 1usize..10, seed in any::<u64>()) {
            let mut numbers: Vec<u32> = (1..=n as u32).collect();
            // deterministic shuffle from the seed
            let len = numbers.len();
            for i in 0..len {
                let j = ((seed.wrapping_mul(i as u64 + 1)) % len as u64) as usize;
                numbers.swap(i, j);
            }
            let steps: Vec<SkeletonStep> = numbers.iter().map(|n| step(*n, "train")).collect();
            prop_assert!(validate_skeleton(steps, &allowed()).is_ok());
        }
    }
}
