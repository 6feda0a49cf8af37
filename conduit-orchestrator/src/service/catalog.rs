//! Dataset catalog service
//!
//! The SQL-backed [`DatasetCatalog`] the reference resolver reads, and the
//! maintenance operations that populate it.

use async_trait::async_trait;
use conduit_core::resolver::{DatasetCatalog, DatasetRow, ResolutionError};
use sqlx::SqlitePool;

use crate::error::SchedulerError;
use crate::repository::dataset_repository;

#[derive(Clone)]
pub struct SqlDatasetCatalog {
    pool: SqlitePool,
}

impl SqlDatasetCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DatasetCatalog for SqlDatasetCatalog {
    async fn find_dataset(&self, id: i64) -> Result<Option<DatasetRow>, ResolutionError> {
        dataset_repository::find_by_id(&self.pool, id)
            .await
            .map_err(|e| ResolutionError::Catalog(e.to_string()))
    }
}

/// Register a dataset; use the public owner to share it with every user
pub async fn register_dataset(
    pool: &SqlitePool,
    id: i64,
    owner_uid: &str,
    path: &str,
) -> Result<DatasetRow, SchedulerError> {
    if owner_uid.trim().is_empty() {
        return Err(SchedulerError::Validation("dataset owner cannot be empty".to_string()));
    }
    if path.trim().is_empty() {
        return Err(SchedulerError::Validation("dataset path cannot be empty".to_string()));
    }
    if dataset_repository::find_by_id(pool, id).await?.is_some() {
        return Err(SchedulerError::DatasetExists(id));
    }

    let row = dataset_repository::insert(pool, id, owner_uid, path).await?;
    tracing::info!(dataset_id = id, owner = %owner_uid, "Dataset registered");
    Ok(row)
}

/// Datasets readable by a user: their own and public ones
pub async fn list_datasets(pool: &SqlitePool, user_uid: &str) -> Result<Vec<DatasetRow>, SchedulerError> {
    Ok(dataset_repository::list_readable(pool, user_uid).await?)
}
