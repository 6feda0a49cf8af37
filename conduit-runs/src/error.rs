use conduit_core::spec_block::SpecBlockError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("run '{0}' not found")]
    NotFound(String),

    #[error("failed to spawn tool '{tool}': {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read tools file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tools file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("tool '{0}' is registered more than once")]
    Duplicate(String),

    #[error("tool '{0}' has an empty command")]
    EmptyCommand(String),

    #[error(transparent)]
    SpecBlock(#[from] SpecBlockError),
}
