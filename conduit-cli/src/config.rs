//! Configuration module
//!
//! Settings shared by every command.

use conduit_orchestrator::OrchestratorConfig;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// User that owns submitted tasks and registered datasets
    pub user_uid: String,

    pub orchestrator: OrchestratorConfig,
}
