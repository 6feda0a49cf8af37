//! Step argument values
//!
//! A step argument is either a literal of the parameter's declared type, a
//! reference, or a flat list of either. Lists never nest.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::reference::RefKind;

/// Argument map of a step, keyed by parameter name
pub type StepArgs = BTreeMap<String, ArgValue>;

/// A scalar literal value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Literal {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Literal::Bool(b) => serde_json::Value::Bool(*b),
            Literal::Int(i) => serde_json::Value::from(*i),
            Literal::Float(f) => serde_json::Value::from(*f),
            Literal::Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Renders the literal the way it is passed on a tool command line
    pub fn render(&self) -> String {
        match self {
            Literal::Bool(b) => b.to_string(),
            Literal::Int(i) => i.to_string(),
            Literal::Float(f) => f.to_string(),
            Literal::Str(s) => s.clone(),
        }
    }

    /// False for NaN and infinite floats, which have no JSON form
    pub fn is_finite(&self) -> bool {
        match self {
            Literal::Float(f) => f.is_finite(),
            _ => true,
        }
    }
}

/// Element of a list-typed argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgItem {
    Literal(Literal),
    Ref(RefKind),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgValue {
    Literal(Literal),
    Ref(RefKind),
    List(Vec<ArgItem>),
}

impl ArgValue {
    pub fn int(v: i64) -> Self {
        ArgValue::Literal(Literal::Int(v))
    }

    pub fn float(v: f64) -> Self {
        ArgValue::Literal(Literal::Float(v))
    }

    pub fn bool(v: bool) -> Self {
        ArgValue::Literal(Literal::Bool(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        ArgValue::Literal(Literal::Str(v.into()))
    }

    /// All references held by this value, in order
    pub fn refs(&self) -> Vec<&RefKind> {
        match self {
            ArgValue::Literal(_) => Vec::new(),
            ArgValue::Ref(r) => vec![r],
            ArgValue::List(items) => items
                .iter()
                .filter_map(|item| match item {
                    ArgItem::Ref(r) => Some(r),
                    ArgItem::Literal(_) => None,
                })
                .collect(),
        }
    }

    /// All literals held by this value, in order
    pub fn literals(&self) -> Vec<&Literal> {
        match self {
            ArgValue::Literal(l) => vec![l],
            ArgValue::Ref(_) => Vec::new(),
            ArgValue::List(items) => items
                .iter()
                .filter_map(|item| match item {
                    ArgItem::Literal(l) => Some(l),
                    ArgItem::Ref(_) => None,
                })
                .collect(),
        }
    }
}

impl From<ArgItem> for ArgValue {
    fn from(item: ArgItem) -> Self {
        match item {
            ArgItem::Literal(l) => ArgValue::Literal(l),
            ArgItem::Ref(r) => ArgValue::Ref(r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_value_json_is_externally_tagged() {
        let v = ArgValue::List(vec![
            ArgItem::Literal(Literal::Int(2)),
            ArgItem::Ref(RefKind::step_output(1)),
        ]);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"list": [{"literal": 2}, {"ref": {"kind": "step_output", "step": 1}}]})
        );
        let back: ArgValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn test_literal_untagged_keeps_integer_and_float_apart() {
        let i: Literal = serde_json::from_str("3").unwrap();
        let f: Literal = serde_json::from_str("3.5").unwrap();
        let b: Literal = serde_json::from_str("true").unwrap();
        assert_eq!(i, Literal::Int(3));
        assert_eq!(f, Literal::Float(3.5));
        assert_eq!(b, Literal::Bool(true));
    }

    #[test]
    fn test_refs_collects_list_references() {
        let v = ArgValue::List(vec![
            ArgItem::Ref(RefKind::dataset(1)),
            ArgItem::Literal(Literal::Str("x".into())),
            ArgItem::Ref(RefKind::dataset(2)),
        ]);
        assert_eq!(v.refs().len(), 2);
        assert!(ArgValue::int(1).refs().is_empty());
    }
}
