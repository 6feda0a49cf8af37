//! Value casting and reference checks
//!
//! Shared by per-parameter planning and by validation of externally supplied
//! plans, so both produce exactly the same argument shapes.

use conduit_core::domain::reference::RefKind;
use conduit_core::domain::tool::{ParamSpec, ParamType, RefKindTag};
use conduit_core::domain::value::Literal;
use conduit_core::resolver::check_structure;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;

/// Casts a raw JSON value to the parameter's declared type
pub fn cast_literal(param_type: ParamType, raw: &JsonValue) -> Result<Literal, String> {
    match param_type {
        ParamType::Int => cast_int(raw).map(Literal::Int),
        ParamType::Float => cast_float(raw).map(Literal::Float),
        ParamType::Bool => cast_bool(raw).map(Literal::Bool),
        ParamType::String | ParamType::Path => match raw {
            JsonValue::String(s) => Ok(Literal::Str(s.clone())),
            JsonValue::Number(n) => Ok(Literal::Str(n.to_string())),
            JsonValue::Bool(b) => Ok(Literal::Str(b.to_string())),
            other => Err(format!("expected a {} value, got {}", param_type, kind_of(other))),
        },
    }
}

/// Re-casts an already typed literal, e.g. from a hand-written plan
pub fn recast_literal(param_type: ParamType, literal: &Literal) -> Result<Literal, String> {
    cast_literal(param_type, &literal.to_json())
}

fn cast_int(raw: &JsonValue) -> Result<i64, String> {
    match raw {
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                _ => Err(format!("{} is not an integer", n)),
            }
        }
        JsonValue::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("'{}' is not an integer", s)),
        other => Err(format!("expected an int value, got {}", kind_of(other))),
    }
}

fn cast_float(raw: &JsonValue) -> Result<f64, String> {
    let value = match raw {
        JsonValue::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{} is not a float", n))?,
        JsonValue::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a float", s))?,
        other => return Err(format!("expected a float value, got {}", kind_of(other))),
    };

    // NaN and infinities have no JSON form and could not be stored
    if !value.is_finite() {
        return Err(format!("{} is not a finite float", value));
    }
    Ok(value)
}

fn cast_bool(raw: &JsonValue) -> Result<bool, String> {
    match raw {
        JsonValue::Bool(b) => Ok(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(format!("{} is not a boolean", n)),
        },
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "on" | "1" => Ok(true),
            "false" | "no" | "n" | "off" | "0" => Ok(false),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        other => Err(format!("expected a bool value, got {}", kind_of(other))),
    }
}

fn kind_of(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Reference as an LLM writes it, before any checks
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRef {
    pub kind: String,
    #[serde(default)]
    pub id: Option<JsonValue>,
    #[serde(default)]
    pub step: Option<JsonValue>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub relative: Option<String>,
}

impl RawRef {
    pub fn into_ref(self) -> Result<RefKind, String> {
        let kind = match self.kind.trim() {
            "dataset" => RefKindTag::Dataset,
            "step_output" => RefKindTag::StepOutput,
            "filesystem" => RefKindTag::Filesystem,
            other => return Err(format!("unknown reference kind '{}'", other)),
        };

        let reference = match kind {
            RefKindTag::Dataset => {
                let raw = self.id.ok_or("dataset reference needs an 'id'")?;
                RefKind::dataset(integer_id(&raw, "dataset id")?)
            }
            RefKindTag::StepOutput => {
                let raw = self.step.ok_or("step_output reference needs a 'step'")?;
                let step = integer_id(&raw, "step")?;
                let step = u32::try_from(step).map_err(|_| format!("step {} is out of range", step))?;
                RefKind::step_output(step)
            }
            RefKindTag::Filesystem => {
                let path = self.path.ok_or("filesystem reference needs a 'path'")?;
                RefKind::filesystem(path)
            }
        };

        Ok(match self.relative.filter(|r| !r.trim().is_empty()) {
            Some(rel) => reference.with_relative(rel),
            None => reference,
        })
    }
}

/// Accepts JSON integers and strings of decimal digits
fn integer_id(raw: &JsonValue, what: &str) -> Result<i64, String> {
    match raw {
        JsonValue::Number(n) => n
            .as_i64()
            .ok_or_else(|| format!("{} must be an integer, got {}", what, n)),
        JsonValue::String(s) if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) => s
            .parse::<i64>()
            .map_err(|_| format!("{} '{}' is out of range", what, s)),
        other => Err(format!("{} must be an integer, got {}", what, other)),
    }
}

/// Checks a reference against a parameter spec and the step it belongs to
pub fn check_ref(
    param: &ParamSpec,
    reference: &RefKind,
    current_step: u32,
    dataset_allow_list: Option<&BTreeSet<i64>>,
) -> Result<(), String> {
    if !param.allow_ref {
        return Err("parameter does not accept references".to_string());
    }
    if !param.ref_kinds.contains(&reference.tag()) {
        let allowed: Vec<String> = param.ref_kinds.iter().map(|k| k.to_string()).collect();
        return Err(format!(
            "reference kind '{}' is not allowed here (allowed: {})",
            reference.tag(),
            allowed.join(", ")
        ));
    }
    if let (RefKind::Dataset { id, .. }, Some(allow_list)) = (reference, dataset_allow_list)
        && !allow_list.contains(id)
    {
        return Err(format!("dataset {} is not in the allowed dataset list", id));
    }

    check_structure(reference, current_step).map_err(|e| e.to_string())
}
