//! Environment variable parsing helpers shared by the config sections.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Read an env var, treating empty and whitespace-only values as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid UTF-8".to_string(),
        }),
    }
}

/// Parse an env var into `T`, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

pub(crate) fn parse_string_env(
    key: &str,
    default: impl Into<String>,
) -> Result<String, ConfigError> {
    Ok(optional_env(key)?.unwrap_or_else(|| default.into()))
}

/// Accepts `true/false`, `1/0`, `yes/no`, `on/off` (case-insensitive).
pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Some(val) = optional_env(key)? else {
        return Ok(default);
    };
    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{val}'"),
        }),
    }
}

/// Parse a positive duration given in whole units (`to_duration` picks the
/// unit). Zero is rejected because every duration here bounds a wait.
pub(crate) fn parse_duration_env(
    key: &str,
    to_duration: fn(u64) -> Duration,
) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = optional_env(key)? else {
        return Ok(None);
    };
    let value: u64 = raw.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("must be a positive integer: {e}"),
    })?;
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(Some(to_duration(value)))
}
