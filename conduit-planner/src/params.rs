//! Per-parameter value planning
//!
//! Every agent-filled parameter of every step is asked for separately, so a
//! bad answer for one parameter never touches another. An answer picks one
//! of three modes:
//!
//! - `literal`: a raw value cast to the declared type
//! - `ref`: a dataset, earlier step output or filesystem reference
//! - `omit`: leave the parameter out (optional parameters only)
//!
//! List parameters answer with an `items` array of literals and refs.

use conduit_core::domain::tool::{ParamSpec, ToolSpec};
use conduit_core::domain::value::{ArgItem, ArgValue};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cast::{RawRef, cast_literal, check_ref};
use crate::error::CompileError;
use crate::extract::StructuredAnswerExtractor;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::prompts::{
    LIST_FORMAT, PARAM_PROMPT, PARAM_SYSTEM_PROMPT, RETRY_SUFFIX, SCALAR_FORMAT,
};
use crate::skeleton::SkeletonStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueMode {
    Literal,
    Ref,
    Omit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemAnswer {
    pub value_mode: ValueMode,
    #[serde(default)]
    pub value: Option<JsonValue>,
    #[serde(default, rename = "ref")]
    pub reference: Option<RawRef>,
}

/// Structured answer for one parameter
#[derive(Debug, Clone, Deserialize)]
pub struct ParamAnswer {
    #[serde(default)]
    pub value_mode: Option<ValueMode>,
    #[serde(default)]
    pub value: Option<JsonValue>,
    #[serde(default, rename = "ref")]
    pub reference: Option<RawRef>,
    #[serde(default)]
    pub items: Option<Vec<ItemAnswer>>,
}

/// Where the parameter being planned sits in the plan
#[derive(Debug, Clone, Copy)]
pub struct ParamContext<'a> {
    pub intent: &'a str,
    pub skeleton: &'a [SkeletonStep],
    pub step: &'a SkeletonStep,
    pub tool: &'a ToolSpec,
}

/// Turns an answer into an argument value, or `None` for an omitted parameter
///
/// All checks are structural and independent of how the answer was produced.
pub fn interpret_answer(
    param: &ParamSpec,
    answer: ParamAnswer,
    current_step: u32,
    dataset_allow_list: Option<&BTreeSet<i64>>,
) -> Result<Option<ArgValue>, String> {
    if param.is_list {
        if answer.value_mode == Some(ValueMode::Omit) {
            return omit(param);
        }
        let items = answer
            .items
            .ok_or("list parameter answers need an 'items' array")?;
        if items.is_empty() {
            return omit(param);
        }

        let values = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                interpret_item(param, item, current_step, dataset_allow_list)
                    .map_err(|e| format!("item {}: {}", i, e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Some(ArgValue::List(values)));
    }

    let mode = answer.value_mode.ok_or("answer is missing 'value_mode'")?;
    let item = ItemAnswer {
        value_mode: mode,
        value: answer.value,
        reference: answer.reference,
    };
    match mode {
        ValueMode::Omit => omit(param),
        _ => interpret_item(param, item, current_step, dataset_allow_list).map(|v| Some(v.into())),
    }
}

fn omit(param: &ParamSpec) -> Result<Option<ArgValue>, String> {
    if param.required {
        Err("parameter is required and cannot be omitted".to_string())
    } else {
        Ok(None)
    }
}

fn interpret_item(
    param: &ParamSpec,
    item: ItemAnswer,
    current_step: u32,
    dataset_allow_list: Option<&BTreeSet<i64>>,
) -> Result<ArgItem, String> {
    match item.value_mode {
        ValueMode::Literal => {
            let raw = item.value.unwrap_or(JsonValue::Null);
            cast_literal(param.param_type, &raw).map(ArgItem::Literal)
        }
        ValueMode::Ref => {
            if !param.allow_ref {
                return Err("parameter does not accept references".to_string());
            }
            let raw = item.reference.ok_or("ref answers need a 'ref' object")?;
            let reference = raw.into_ref()?;
            check_ref(param, &reference, current_step, dataset_allow_list)?;
            Ok(ArgItem::Ref(reference))
        }
        ValueMode::Omit => Err("list items cannot be omitted".to_string()),
    }
}

pub struct ParamPlanner {
    llm: Arc<dyn LlmProvider>,
    extractor: StructuredAnswerExtractor,
    max_attempts: u32,
    temperature: f64,
    dataset_allow_list: Option<BTreeSet<i64>>,
}

impl ParamPlanner {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        max_attempts: u32,
        temperature: f64,
        dataset_allow_list: Option<BTreeSet<i64>>,
    ) -> Self {
        Self {
            llm,
            extractor: StructuredAnswerExtractor::new(),
            max_attempts: max_attempts.max(1),
            temperature,
            dataset_allow_list,
        }
    }

    /// Plans one parameter
    ///
    /// Exhausting the attempts on a required parameter is a `ParamPlan` error;
    /// on an optional one the parameter is omitted. Backend failures abort at
    /// once.
    pub async fn plan(
        &self,
        ctx: ParamContext<'_>,
        param: &ParamSpec,
    ) -> Result<Option<ArgValue>, CompileError> {
        let base_prompt = self.prompt(&ctx, param);

        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            let mut prompt = base_prompt.clone();
            if attempt > 1 {
                prompt.push_str(&RETRY_SUFFIX.replace("{error}", &last_error));
            }

            let request = GenerationRequest::new(
                "",
                vec![Message::system(PARAM_SYSTEM_PROMPT), Message::user(prompt)],
            )
            .with_temperature(self.temperature)
            .with_json_mode();

            let response = self.llm.generate(request).await?;

            let outcome = self
                .extractor
                .extract::<ParamAnswer>(&response)
                .map_err(|e| e.to_string())
                .and_then(|answer| {
                    interpret_answer(
                        param,
                        answer,
                        ctx.step.step_number,
                        self.dataset_allow_list.as_ref(),
                    )
                });

            match outcome {
                Ok(value) => {
                    debug!(
                        step = ctx.step.step_number,
                        param = %param.name,
                        omitted = value.is_none(),
                        attempt,
                        "Planned parameter"
                    );
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        step = ctx.step.step_number,
                        param = %param.name,
                        attempt,
                        "Rejected parameter answer: {}",
                        e
                    );
                    last_error = e;
                }
            }
        }

        if param.required {
            return Err(CompileError::ParamPlan {
                step: ctx.step.step_number,
                tool: ctx.tool.name.clone(),
                param: param.name.clone(),
                attempts: self.max_attempts,
                reason: last_error,
            });
        }

        warn!(
            step = ctx.step.step_number,
            param = %param.name,
            "Omitting optional parameter after {} failed attempt(s)",
            self.max_attempts
        );
        Ok(None)
    }

    fn prompt(&self, ctx: &ParamContext<'_>, param: &ParamSpec) -> String {
        let steps = ctx
            .skeleton
            .iter()
            .map(|s| format!("{}. {} - {}", s.step_number, s.tool_name, s.purpose))
            .collect::<Vec<_>>()
            .join("\n");

        let datasets = match &self.dataset_allow_list {
            Some(ids) => {
                let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                format!("Dataset ids you may reference: {}\n", ids.join(", "))
            }
            None => String::new(),
        };

        let format = if param.is_list { LIST_FORMAT } else { SCALAR_FORMAT };

        PARAM_PROMPT
            .replace("{steps}", &steps)
            .replace("{param_spec}", &describe_param(param))
            .replace("{datasets}", &datasets)
            .replace("{format}", format)
            .replace("{param}", &param.name)
            .replace("{step_number}", &ctx.step.step_number.to_string())
            .replace("{tool}", &ctx.tool.name)
            .replace("{purpose}", &ctx.step.purpose)
            .replace("{intent}", ctx.intent.trim())
    }
}

fn describe_param(param: &ParamSpec) -> String {
    let mut lines = vec![
        format!("name: {}", param.name),
        format!("type: {}", param.param_type),
        format!("required: {}", param.required),
        format!("list: {}", param.is_list),
    ];
    if param.allow_ref {
        let kinds: Vec<String> = param.ref_kinds.iter().map(|k| k.to_string()).collect();
        lines.push(format!("references allowed: {}", kinds.join(", ")));
    } else {
        lines.push("references allowed: none, literal values only".to_string());
    }
    if let Some(description) = &param.description {
        lines.push(format!("description: {}", description));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_core::domain::reference::RefKind;
    use conduit_core::domain::tool::{ParamType, RefKindTag};
    use conduit_core::domain::value::Literal;
    use serde_json::json;

    fn param(param_type: ParamType, required: bool) -> ParamSpec {
        ParamSpec {
            name: "p".to_string(),
            param_type,
            required,
            is_list: false,
            filled_by: Default::default(),
            allow_ref: false,
            ref_kinds: Default::default(),
            input: false,
            description: None,
        }
    }

    fn answer(value: serde_json::Value) -> ParamAnswer {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_literal_is_cast() {
        let value = interpret_answer(
            &param(ParamType::Int, true),
            answer(json!({"value_mode": "literal", "value": "8"})),
            1,
            None,
        )
        .unwrap();
        assert_eq!(value, Some(ArgValue::int(8)));
    }

    #[test]
    fn test_ref_rejected_when_not_allowed() {
        let err = interpret_answer(
            &param(ParamType::Path, true),
            answer(json!({"value_mode": "ref", "ref": {"kind": "dataset", "id": 1}})),
            1,
            None,
        )
        .unwrap_err();
        assert!(err.contains("does not accept references"));
    }

    #[test]
    fn test_omit_rules() {
        let omit = || answer(json!({"value_mode": "omit"}));
        assert!(interpret_answer(&param(ParamType::Int, true), omit(), 1, None).is_err());
        assert_eq!(
            interpret_answer(&param(ParamType::Int, false), omit(), 1, None).unwrap(),
            None
        );
    }

    #[test]
    fn test_list_items() {
        let mut p = param(ParamType::String, false);
        p.is_list = true;
        p.allow_ref = true;
        p.ref_kinds = [RefKindTag::StepOutput].into_iter().collect();

        let value = interpret_answer(
            &p,
            answer(json!({"items": [
                {"value_mode": "literal", "value": "r"},
                {"value_mode": "ref", "ref": {"kind": "step_output", "step": 1}}
            ]})),
            2,
            None,
        )
        .unwrap();
        assert_eq!(
            value,
            Some(ArgValue::List(vec![
                ArgItem::Literal(Literal::Str("r".to_string())),
                ArgItem::Ref(RefKind::step_output(1)),
            ]))
        );

        let err = interpret_answer(
            &p,
            answer(json!({"items": [{"value_mode": "omit"}]})),
            2,
            None,
        )
        .unwrap_err();
        assert!(err.contains("cannot be omitted"));

        assert_eq!(
            interpret_answer(&p, answer(json!({"items": []})), 2, None).unwrap(),
            None
        );
        p.required = true;
        assert!(interpret_answer(&p, answer(json!({"items": []})), 2, None).is_err());
    }

    #[test]
    fn test_forward_step_reference_rejected() {
        let mut p = param(ParamType::Path, true);
        p.allow_ref = true;
        p.ref_kinds = [RefKindTag::StepOutput].into_iter().collect();

        let err = interpret_answer(
            &p,
            answer(json!({"value_mode": "ref", "ref": {"kind": "step_output", "step": 3}})),
            2,
            None,
        )
        .unwrap_err();
        assert!(err.contains("step 2 may only reference steps before it"));
    }
}
