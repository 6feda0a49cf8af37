//! Environment configuration helpers shared by the service crates

use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(String),

    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Reads and parses an environment variable, falling back to `default` when unset
pub fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, &raw),
        _ => Ok(default),
    }
}

/// Reads a required environment variable
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::Missing(key.to_string()))
}

pub fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value::<u64>("X", " 42 ").unwrap(), 42);
        let err = parse_value::<u64>("CONDUIT_POLL_INTERVAL_MS", "soon").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "CONDUIT_POLL_INTERVAL_MS"));
    }

    #[test]
    fn test_env_or_default_when_unset() {
        let value: u32 = env_or("CONDUIT_TEST_SURELY_UNSET_KEY", 7).unwrap();
        assert_eq!(value, 7);
        assert!(env_required("CONDUIT_TEST_SURELY_UNSET_KEY").is_err());
    }
}
