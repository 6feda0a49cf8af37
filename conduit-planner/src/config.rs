//! Planner configuration

use conduit_core::config::{ConfigError, env_or, parse_value};
use std::collections::BTreeSet;
use std::str::FromStr;

/// What to do with argument keys a tool does not declare
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParamPolicy {
    /// Strip unknown keys with a warning
    #[default]
    Drop,
    /// Reject the plan
    Error,
    /// Pass unknown keys through untouched
    Allow,
}

impl FromStr for ParamPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(ParamPolicy::Drop),
            "error" => Ok(ParamPolicy::Error),
            "allow" => Ok(ParamPolicy::Allow),
            other => Err(format!("expected drop, error or allow, got '{}'", other)),
        }
    }
}

impl std::fmt::Display for ParamPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamPolicy::Drop => write!(f, "drop"),
            ParamPolicy::Error => write!(f, "error"),
            ParamPolicy::Allow => write!(f, "allow"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Total attempts per stage and per parameter
    pub max_retries: u32,

    /// Maximum number of tools listed in the step planning prompt
    pub prompt_tools_limit: usize,

    pub param_policy: ParamPolicy,

    /// Dataset ids the planner may reference; `None` allows any id
    pub dataset_allow_list: Option<BTreeSet<i64>>,

    pub temperature: f64,
}

impl PlannerConfig {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - CONDUIT_MAX_RETRIES (optional, default: 3)
    /// - CONDUIT_PROMPT_TOOLS_LIMIT (optional, default: 40)
    /// - CONDUIT_PARAM_POLICY (optional, drop|error|allow, default: drop)
    /// - CONDUIT_DATASET_ALLOW_LIST (optional, comma separated ids)
    /// - CONDUIT_LLM_TEMPERATURE (optional, default: 0.0)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let dataset_allow_list = match std::env::var("CONDUIT_DATASET_ALLOW_LIST") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_allow_list(&raw)?),
            _ => None,
        };

        Ok(Self {
            max_retries: env_or("CONDUIT_MAX_RETRIES", defaults.max_retries)?,
            prompt_tools_limit: env_or("CONDUIT_PROMPT_TOOLS_LIMIT", defaults.prompt_tools_limit)?,
            param_policy: env_or("CONDUIT_PARAM_POLICY", defaults.param_policy)?,
            dataset_allow_list,
            temperature: env_or("CONDUIT_LLM_TEMPERATURE", defaults.temperature)?,
        })
    }

    pub fn with_dataset_allow_list(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.dataset_allow_list = Some(ids.into_iter().collect());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(invalid("CONDUIT_MAX_RETRIES", "0", "must be at least 1"));
        }
        if self.prompt_tools_limit == 0 {
            return Err(invalid("CONDUIT_PROMPT_TOOLS_LIMIT", "0", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(invalid(
                "CONDUIT_LLM_TEMPERATURE",
                &self.temperature.to_string(),
                "must be between 0.0 and 2.0",
            ));
        }
        Ok(())
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            prompt_tools_limit: 40,
            param_policy: ParamPolicy::Drop,
            dataset_allow_list: None,
            temperature: 0.0,
        }
    }
}

fn parse_allow_list(raw: &str) -> Result<BTreeSet<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_value::<i64>("CONDUIT_DATASET_ALLOW_LIST", s))
        .collect()
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
