//! Reference domain types
//!
//! A reference is a symbolic pointer to data: a dataset catalog row, the output
//! of an earlier step in the same task, or a raw filesystem path. Each variant
//! carries only the fields that make sense for it.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::domain::tool::RefKindTag;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RefKind {
    Dataset {
        id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relative: Option<String>,
    },
    StepOutput {
        step: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relative: Option<String>,
    },
    Filesystem {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relative: Option<String>,
    },
}

impl RefKind {
    pub fn dataset(id: i64) -> Self {
        RefKind::Dataset { id, relative: None }
    }

    pub fn step_output(step: u32) -> Self {
        RefKind::StepOutput {
            step,
            relative: None,
        }
    }

    pub fn filesystem(path: impl Into<String>) -> Self {
        RefKind::Filesystem {
            path: path.into(),
            relative: None,
        }
    }

    /// Returns a copy of this reference pointing at a sub-path
    pub fn with_relative(mut self, rel: impl Into<String>) -> Self {
        let rel = Some(rel.into());
        match &mut self {
            RefKind::Dataset { relative, .. }
            | RefKind::StepOutput { relative, .. }
            | RefKind::Filesystem { relative, .. } => *relative = rel,
        }
        self
    }

    pub fn tag(&self) -> RefKindTag {
        match self {
            RefKind::Dataset { .. } => RefKindTag::Dataset,
            RefKind::StepOutput { .. } => RefKindTag::StepOutput,
            RefKind::Filesystem { .. } => RefKindTag::Filesystem,
        }
    }

    pub fn relative(&self) -> Option<&str> {
        match self {
            RefKind::Dataset { relative, .. }
            | RefKind::StepOutput { relative, .. }
            | RefKind::Filesystem { relative, .. } => relative.as_deref(),
        }
    }
}

impl std::fmt::Display for RefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefKind::Dataset { id, .. } => write!(f, "dataset:{}", id)?,
            RefKind::StepOutput { step, .. } => write!(f, "step:{}", step)?,
            RefKind::Filesystem { path, .. } => write!(f, "fs:{}", path)?,
        }
        if let Some(rel) = self.relative() {
            write!(f, "/{}", rel)?;
        }
        Ok(())
    }
}

/// Checks that a sub-path stays inside the directory it is joined onto
pub fn is_contained_relative(rel: &str) -> bool {
    Path::new(rel)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_kind_json_shape() {
        let r = RefKind::step_output(1).with_relative("tiles");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "step_output", "step": 1, "relative": "tiles"})
        );

        let parsed: RefKind =
            serde_json::from_value(serde_json::json!({"kind": "dataset", "id": 7})).unwrap();
        assert_eq!(parsed, RefKind::dataset(7));
    }

    #[test]
    fn test_contained_relative() {
        assert!(is_contained_relative("a/b/c.tif"));
        assert!(is_contained_relative("./a"));
        assert!(!is_contained_relative("../escape"));
        assert!(!is_contained_relative("a/../../b"));
        assert!(!is_contained_relative("/etc/passwd"));
    }

    #[test]
    fn test_display() {
        assert_eq!(RefKind::dataset(3).to_string(), "dataset:3");
        assert_eq!(
            RefKind::filesystem("/data").with_relative("x").to_string(),
            "fs:/data/x"
        );
    }
}
