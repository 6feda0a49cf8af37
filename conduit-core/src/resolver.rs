//! Reference resolver
//!
//! Turns a symbolic [`RefKind`] into a concrete, permission-checked directory
//! path. Resolution has no side effects: it reads the dataset catalog and a
//! snapshot of the task's completed step outputs, nothing else.
//!
//! The structural half of the checks ([`check_structure`]) needs no catalog and
//! is shared with the plan compiler, which validates references long before
//! any step runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::reference::{RefKind, is_contained_relative};

/// Owner value marking a dataset readable by every user
pub const PUBLIC_OWNER: &str = "public";

#[derive(Debug, Error, PartialEq)]
pub enum ResolutionError {
    #[error("dataset {0} not found")]
    NotFound(i64),

    #[error("dataset {id} is not accessible to user '{user_uid}'")]
    Forbidden { id: i64, user_uid: String },

    #[error("invalid reference {reference}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("dataset catalog unavailable: {0}")]
    Catalog(String),
}

impl ResolutionError {
    fn invalid(reference: &RefKind, reason: impl Into<String>) -> Self {
        ResolutionError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}

/// A dataset catalog row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRow {
    pub id: i64,
    pub owner_uid: String,
    pub path: String,
}

impl DatasetRow {
    pub fn is_readable_by(&self, user_uid: &str) -> bool {
        self.owner_uid == user_uid || self.owner_uid == PUBLIC_OWNER
    }
}

/// Read access to the dataset catalog
#[async_trait]
pub trait DatasetCatalog: Send + Sync {
    async fn find_dataset(&self, id: i64) -> Result<Option<DatasetRow>, ResolutionError>;
}

/// In-memory implementation of DatasetCatalog
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    rows: HashMap<i64, DatasetRow>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, id: i64, owner_uid: &str, path: &str) -> Self {
        self.rows.insert(
            id,
            DatasetRow {
                id,
                owner_uid: owner_uid.to_string(),
                path: path.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl DatasetCatalog for InMemoryCatalog {
    async fn find_dataset(&self, id: i64) -> Result<Option<DatasetRow>, ResolutionError> {
        Ok(self.rows.get(&id).cloned())
    }
}

/// Snapshot of task state a reference is resolved against
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub user_uid: String,
    pub task_uid: Uuid,
    /// Number of the step whose arguments are being resolved
    pub current_step: u32,
    /// Output directories of the steps that completed successfully
    pub prior_outputs: BTreeMap<u32, PathBuf>,
}

/// Checks the parts of a reference that do not depend on the catalog or on
/// which steps have run: sub-path containment, step ordering and path shape.
pub fn check_structure(reference: &RefKind, current_step: u32) -> Result<(), ResolutionError> {
    if let Some(rel) = reference.relative()
        && !is_contained_relative(rel)
    {
        return Err(ResolutionError::invalid(
            reference,
            "relative path must stay inside the referenced directory",
        ));
    }

    match reference {
        RefKind::StepOutput { step, .. } => {
            if *step == 0 {
                return Err(ResolutionError::invalid(reference, "step numbers start at 1"));
            }
            if *step >= current_step {
                return Err(ResolutionError::invalid(
                    reference,
                    format!("step {} may only reference steps before it", current_step),
                ));
            }
        }
        RefKind::Filesystem { path, .. } => {
            if path.trim().is_empty() {
                return Err(ResolutionError::invalid(reference, "path cannot be empty"));
            }
        }
        RefKind::Dataset { .. } => {}
    }

    Ok(())
}

/// Resolves references against a dataset catalog
#[derive(Clone)]
pub struct ReferenceResolver {
    catalog: Arc<dyn DatasetCatalog>,
}

impl ReferenceResolver {
    pub fn new(catalog: Arc<dyn DatasetCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn resolve(
        &self,
        reference: &RefKind,
        ctx: &ResolveContext,
    ) -> Result<PathBuf, ResolutionError> {
        check_structure(reference, ctx.current_step)?;

        let base = match reference {
            RefKind::Dataset { id, .. } => {
                let row = self
                    .catalog
                    .find_dataset(*id)
                    .await?
                    .ok_or(ResolutionError::NotFound(*id))?;

                if !row.is_readable_by(&ctx.user_uid) {
                    return Err(ResolutionError::Forbidden {
                        id: *id,
                        user_uid: ctx.user_uid.clone(),
                    });
                }
                PathBuf::from(row.path)
            }
            RefKind::StepOutput { step, .. } => ctx
                .prior_outputs
                .get(step)
                .cloned()
                .ok_or_else(|| {
                    ResolutionError::invalid(
                        reference,
                        format!("step {} has no recorded output", step),
                    )
                })?,
            RefKind::Filesystem { path, .. } => PathBuf::from(path),
        };

        Ok(match reference.relative() {
            Some(rel) => base.join(rel),
            None => base,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ReferenceResolver {
        let catalog = InMemoryCatalog::new()
            .with_dataset(1, "alice", "/catalog/1")
            .with_dataset(2, PUBLIC_OWNER, "/catalog/shared")
            .with_dataset(7, "bob", "/catalog/7");
        ReferenceResolver::new(Arc::new(catalog))
    }

    fn ctx(current_step: u32) -> ResolveContext {
        let mut prior_outputs = BTreeMap::new();
        prior_outputs.insert(1, PathBuf::from("/ws/alice/t/s1/output"));
        ResolveContext {
            user_uid: "alice".to_string(),
            task_uid: Uuid::new_v4(),
            current_step,
            prior_outputs,
        }
    }

    #[tokio::test]
    async fn test_dataset_owned_and_public() {
        let r = resolver();
        assert_eq!(
            r.resolve(&RefKind::dataset(1), &ctx(1)).await.unwrap(),
            PathBuf::from("/catalog/1")
        );
        assert_eq!(
            r.resolve(&RefKind::dataset(2).with_relative("raw"), &ctx(1))
                .await
                .unwrap(),
            PathBuf::from("/catalog/shared/raw")
        );
    }

    #[tokio::test]
    async fn test_dataset_of_other_user_is_forbidden() {
        let err = resolver()
            .resolve(&RefKind::dataset(7), &ctx(1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolutionError::Forbidden {
                id: 7,
                user_uid: "alice".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_dataset() {
        let err = resolver()
            .resolve(&RefKind::dataset(99), &ctx(1))
            .await
            .unwrap_err();
        assert_eq!(err, ResolutionError::NotFound(99));
    }

    #[tokio::test]
    async fn test_step_output_ordering() {
        let r = resolver();
        assert_eq!(
            r.resolve(&RefKind::step_output(1), &ctx(2)).await.unwrap(),
            PathBuf::from("/ws/alice/t/s1/output")
        );

        // self reference
        assert!(matches!(
            r.resolve(&RefKind::step_output(2), &ctx(2)).await,
            Err(ResolutionError::InvalidReference { .. })
        ));
        // forward reference
        assert!(matches!(
            r.resolve(&RefKind::step_output(3), &ctx(2)).await,
            Err(ResolutionError::InvalidReference { .. })
        ));
    }

    #[tokio::test]
    async fn test_step_output_without_recorded_output() {
        let err = resolver()
            .resolve(&RefKind::step_output(2), &ctx(3))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no recorded output"));
    }

    #[tokio::test]
    async fn test_filesystem_is_verbatim() {
        assert_eq!(
            resolver()
                .resolve(&RefKind::filesystem("/data/in").with_relative("a"), &ctx(1))
                .await
                .unwrap(),
            PathBuf::from("/data/in/a")
        );
    }

    #[test]
    fn test_check_structure_rejects_escaping_relative() {
        let r = RefKind::dataset(1).with_relative("../../etc");
        assert!(check_structure(&r, 1).is_err());
        assert!(check_structure(&RefKind::step_output(0), 3).is_err());
        assert!(check_structure(&RefKind::filesystem("  "), 1).is_err());
        assert!(check_structure(&RefKind::step_output(1), 2).is_ok());
    }
}
