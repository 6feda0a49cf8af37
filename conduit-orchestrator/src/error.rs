use conduit_runs::{RegistryError, RunError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("invalid task: {0}")]
    Validation(String),

    #[error("tools not registered: {}", .0.join(", "))]
    UnknownTools(Vec<String>),

    #[error("dataset {0} already registered")]
    DatasetExists(i64),

    #[error("scheduler worker already started")]
    AlreadyStarted,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
