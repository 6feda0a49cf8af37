//! Orchestrator configuration
//!
//! Where state lives and how the scheduler paces itself.

use conduit_core::config::{ConfigError, env_or};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// SQLite URL of the task and dataset store
    pub database_url: String,

    /// Root under which every step's working directory is created
    pub workspace_root: PathBuf,

    /// JSON file listing the registered tools
    pub tools_file: PathBuf,

    /// How often a running step's status is polled
    pub poll_interval: Duration,

    /// Log lines kept as diagnostic context for a failed step
    pub log_tail_lines: usize,

    pub max_connections: u32,
}

impl OrchestratorConfig {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - CONDUIT_DATABASE_URL (optional, default: sqlite://conduit.db)
    /// - CONDUIT_WORKSPACE_ROOT (optional, default: ./workspace)
    /// - CONDUIT_TOOLS_FILE (optional, default: tools.json)
    /// - CONDUIT_POLL_INTERVAL_MS (optional, default: 500)
    /// - CONDUIT_LOG_TAIL_LINES (optional, default: 20)
    /// - CONDUIT_MAX_CONNECTIONS (optional, default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let poll_ms: u64 = env_or(
            "CONDUIT_POLL_INTERVAL_MS",
            defaults.poll_interval.as_millis() as u64,
        )?;

        Ok(Self {
            database_url: env_or("CONDUIT_DATABASE_URL", defaults.database_url)?,
            workspace_root: env_or("CONDUIT_WORKSPACE_ROOT", defaults.workspace_root)?,
            tools_file: env_or("CONDUIT_TOOLS_FILE", defaults.tools_file)?,
            poll_interval: Duration::from_millis(poll_ms),
            log_tail_lines: env_or("CONDUIT_LOG_TAIL_LINES", defaults.log_tail_lines)?,
            max_connections: env_or("CONDUIT_MAX_CONNECTIONS", defaults.max_connections)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.database_url.starts_with("sqlite:") {
            return Err(invalid(
                "CONDUIT_DATABASE_URL",
                &self.database_url,
                "must be a sqlite: URL",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("CONDUIT_POLL_INTERVAL_MS", "0", "must be positive"));
        }
        if self.max_connections == 0 {
            return Err(invalid("CONDUIT_MAX_CONNECTIONS", "0", "must be at least 1"));
        }
        Ok(())
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://conduit.db".to_string(),
            workspace_root: PathBuf::from("./workspace"),
            tools_file: PathBuf::from("tools.json"),
            poll_interval: Duration::from_millis(500),
            log_tail_lines: 20,
            max_connections: 5,
        }
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(OrchestratorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_sqlite_url() {
        let config = OrchestratorConfig {
            database_url: "postgres://localhost/conduit".to_string(),
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref key, .. }) if key == "CONDUIT_DATABASE_URL"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = OrchestratorConfig {
            poll_interval: Duration::ZERO,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
