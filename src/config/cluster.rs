use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{
    optional_env, parse_bool_env, parse_duration_env, parse_optional_env, parse_string_env,
};
use crate::error::ConfigError;

/// Where worker pods live and what they look like.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Kubeconfig file. `None` infers in-cluster or default kube config.
    pub kubeconfig: Option<PathBuf>,
    /// Namespace all worker pods are created in.
    pub namespace: String,
    /// Pod template file. `None` uses the built-in `bsdtar` template.
    pub template_path: Option<PathBuf>,
    /// Overrides the name prefix the template declares.
    pub name_prefix: Option<String>,
    /// Container to attach to. `None` picks the template's first container.
    pub container: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            namespace: "spdytests".to_string(),
            template_path: None,
            name_prefix: None,
            container: None,
        }
    }
}

impl ClusterConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            kubeconfig: optional_env("KUBECONFIG")?.map(PathBuf::from),
            namespace: parse_string_env("POD_NAMESPACE", defaults.namespace)?,
            template_path: optional_env("POD_TEMPLATE_PATH")?.map(PathBuf::from),
            name_prefix: optional_env("POD_NAME_PREFIX")?,
            container: optional_env("POD_CONTAINER")?,
        })
    }
}

/// How long and how often to wait for a worker pod to start.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Overall budget for the pod to reach `Running`.
    pub start_timeout: Duration,
    /// Stop polling as soon as the pod reaches `Failed` or `Succeeded`
    /// instead of waiting out the full budget.
    pub fail_fast: bool,
    /// Delete worker pods once the request finishes, on every path.
    pub cleanup: bool,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            start_timeout: Duration::from_secs(60),
            fail_fast: false,
            cleanup: true,
        }
    }
}

impl ProvisionerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            poll_interval: parse_duration_env("POD_POLL_INTERVAL_MS", Duration::from_millis)?
                .unwrap_or(defaults.poll_interval),
            start_timeout: parse_duration_env("POD_START_TIMEOUT_SECS", Duration::from_secs)?
                .unwrap_or(defaults.start_timeout),
            fail_fast: parse_bool_env("POD_FAIL_FAST", defaults.fail_fast)?,
            cleanup: parse_bool_env("POD_CLEANUP", defaults.cleanup)?,
        };

        if config.poll_interval > config.start_timeout {
            return Err(ConfigError::InvalidValue {
                key: "POD_POLL_INTERVAL_MS".to_string(),
                message: format!(
                    "poll interval {:?} exceeds start timeout {:?}",
                    config.poll_interval, config.start_timeout
                ),
            });
        }

        Ok(config)
    }
}

/// Limits on the stdin relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bound on the whole relay phase. `None` leaves it bounded only by the
    /// client connection and server shutdown.
    ///
    /// Waiting for the remote side to finish after stdin is closed is part
    /// of this phase. If the API server never reports the session closed,
    /// an unbounded relay holds the request until shutdown, so set
    /// `RELAY_TIMEOUT_SECS` in production.
    pub timeout: Option<Duration>,
    /// Read buffer size for the copy loop.
    pub buffer_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            buffer_bytes: 64 * 1024,
        }
    }
}

impl RelayConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let buffer_bytes = parse_optional_env("RELAY_BUFFER_BYTES", defaults.buffer_bytes)?;
        if buffer_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "RELAY_BUFFER_BYTES".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            timeout: parse_duration_env("RELAY_TIMEOUT_SECS", Duration::from_secs)?,
            buffer_bytes,
        })
    }
}
