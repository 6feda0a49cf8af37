//! Argument policy and plan validation
//!
//! The output contract of the compiler: every step names a known tool, and
//! every argument is a literal of the declared type, a reference the
//! parameter accepts, or a list of those. [`validate_plan`] enforces that
//! contract on any step list, including hand-written ones.

use conduit_core::domain::task::{PlannedStep, check_step_numbers};
use conduit_core::domain::tool::{ParamSpec, ToolSpec};
use conduit_core::domain::value::{ArgItem, ArgValue, StepArgs};
use std::collections::BTreeSet;
use tracing::warn;

use crate::cast::{check_ref, recast_literal};
use crate::catalog::ToolCatalog;
use crate::config::ParamPolicy;
use crate::error::{CompileError, CompileErrors};

/// Applies the unknown-key policy and strips runtime-reserved keys
///
/// Reserved keys are removed under every policy.
pub fn sanitize_args(
    tool: &ToolSpec,
    mut args: StepArgs,
    policy: ParamPolicy,
) -> Result<StepArgs, String> {
    for key in tool.reserved_keys() {
        if args.remove(&key).is_some() {
            warn!(tool = %tool.name, key = %key, "Stripped runtime-reserved argument");
        }
    }

    let allowed: BTreeSet<&str> = tool.agent_params().map(|p| p.name.as_str()).collect();
    let unknown: Vec<String> = args
        .keys()
        .filter(|k| !allowed.contains(k.as_str()))
        .cloned()
        .collect();

    if unknown.is_empty() {
        return Ok(args);
    }

    match policy {
        ParamPolicy::Allow => Ok(args),
        ParamPolicy::Error => Err(format!(
            "unknown parameter(s) for tool '{}': {}",
            tool.name,
            unknown.join(", ")
        )),
        ParamPolicy::Drop => {
            for key in unknown {
                warn!(tool = %tool.name, key = %key, "Dropped unknown argument");
                args.remove(&key);
            }
            Ok(args)
        }
    }
}

/// Checks one argument against its parameter spec, normalizing literals
pub fn check_arg(
    param: &ParamSpec,
    value: ArgValue,
    step_number: u32,
    dataset_allow_list: Option<&BTreeSet<i64>>,
) -> Result<ArgValue, String> {
    let check_item = |item: ArgItem| -> Result<ArgItem, String> {
        match item {
            ArgItem::Literal(literal) => {
                recast_literal(param.param_type, &literal).map(ArgItem::Literal)
            }
            ArgItem::Ref(reference) => {
                check_ref(param, &reference, step_number, dataset_allow_list)?;
                Ok(ArgItem::Ref(reference))
            }
        }
    };

    match (value, param.is_list) {
        (ArgValue::List(items), true) => items
            .into_iter()
            .map(check_item)
            .collect::<Result<Vec<_>, _>>()
            .map(ArgValue::List),
        (ArgValue::List(_), false) => Err("a list was given for a single-valued parameter".to_string()),
        (ArgValue::Literal(literal), true) => {
            check_item(ArgItem::Literal(literal)).map(|item| ArgValue::List(vec![item]))
        }
        (ArgValue::Ref(reference), true) => {
            check_item(ArgItem::Ref(reference)).map(|item| ArgValue::List(vec![item]))
        }
        (ArgValue::Literal(literal), false) => check_item(ArgItem::Literal(literal)).map(ArgValue::from),
        (ArgValue::Ref(reference), false) => check_item(ArgItem::Ref(reference)).map(ArgValue::from),
    }
}

/// Validates a whole plan and returns it normalized and ordered
///
/// Every problem found is reported, not only the first.
pub fn validate_plan(
    steps: Vec<PlannedStep>,
    catalog: &ToolCatalog,
    policy: ParamPolicy,
    dataset_allow_list: Option<&BTreeSet<i64>>,
) -> Result<Vec<PlannedStep>, CompileErrors> {
    let numbers: Vec<u32> = steps.iter().map(|s| s.step_number).collect();
    check_step_numbers(&numbers).map_err(CompileError::Validation)?;

    let mut errors = Vec::new();
    let mut validated = Vec::with_capacity(steps.len());

    for step in steps {
        let issue = |msg: String| {
            CompileError::Validation(format!(
                "step {} ({}): {}",
                step.step_number, step.tool_name, msg
            ))
        };

        let Some(tool) = catalog.get(&step.tool_name) else {
            errors.push(issue("tool is not available".to_string()));
            continue;
        };

        let args = match sanitize_args(tool, step.args.clone(), policy) {
            Ok(args) => args,
            Err(e) => {
                errors.push(issue(e));
                continue;
            }
        };

        let mut checked = StepArgs::new();
        for (name, value) in args {
            match tool.param(&name) {
                Some(param) => {
                    match check_arg(param, value, step.step_number, dataset_allow_list) {
                        Ok(value) => {
                            checked.insert(name, value);
                        }
                        Err(e) => errors.push(issue(format!("parameter '{}': {}", name, e))),
                    }
                }
                // only reachable under the allow policy
                None => {
                    checked.insert(name, value);
                }
            }
        }

        for param in tool.agent_params().filter(|p| p.required) {
            let present = match checked.get(&param.name) {
                Some(ArgValue::List(items)) => !items.is_empty(),
                Some(_) => true,
                None => false,
            };
            if !present {
                errors.push(issue(format!(
                    "required parameter '{}' is missing",
                    param.name
                )));
            }
        }

        validated.push(PlannedStep {
            args: checked,
            ..step
        });
    }

    if !errors.is_empty() {
        return Err(CompileErrors(errors));
    }

    validated.sort_by_key(|s| s.step_number);
    Ok(validated)
}
