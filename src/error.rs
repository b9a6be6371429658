//! Error types for podpipe.
//!
//! Each concern gets its own enum. Per-request failures roll up into
//! [`PipeError`], which knows which phase failed and how to render it for
//! the HTTP caller.

use std::time::Duration;

use axum::http::StatusCode;

use crate::cluster::UnitPhase;

/// Configuration errors (fatal at startup).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Problems with the pod template document.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse template: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("template defines no containers")]
    NoContainers,

    #[error("template has no container named {0}")]
    ContainerNotFound(String),

    #[error("container {0} does not accept stdin (set stdin: true)")]
    StdinDisabled(String),
}

/// Failures reported by the cluster control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("failed to build cluster client: {0}")]
    Bootstrap(String),

    #[error("{operation} failed: {reason}")]
    Api { operation: &'static str, reason: String },

    #[error("pod {namespace}/{name} not found")]
    NotFound { namespace: String, name: String },

    #[error("attach failed: {0}")]
    Attach(String),
}

/// Failures while creating a worker pod and waiting for it to run.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("create pod {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error(
        "timed out waiting for the condition: pod {name} not running after {waited:?} (last phase: {last_phase}{})",
        .last_error.as_deref().map(|e| format!(", last error: {e}")).unwrap_or_default()
    )]
    Timeout {
        name: String,
        waited: Duration,
        last_phase: UnitPhase,
        last_error: Option<String>,
    },

    #[error("pod {name} reached terminal phase {phase} before running")]
    UnitFailed { name: String, phase: UnitPhase },
}

/// Failures negotiating the attach session.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("attach handshake with {name} failed: {source}")]
    Handshake {
        name: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error("attach session for {0} exposes no stdin stream")]
    StdinUnavailable(String),
}

/// Failures while relaying the request body into the attach session.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("reading request body: {0}")]
    Source(#[source] std::io::Error),

    #[error("writing to remote stdin after {written} bytes: {source}")]
    Sink {
        written: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("finalizing attach session: {0}")]
    Finalize(String),

    #[error("relay cancelled after {written} bytes")]
    Cancelled { written: u64 },

    #[error("relay exceeded {limit:?} after {written} bytes")]
    DeadlineExceeded { limit: Duration, written: u64 },
}

/// A per-request failure, tagged with the phase that produced it.
#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("createBuilderPod: {0}")]
    Provision(#[from] ProvisionError),

    #[error("NewSPDYExecutor: {0}")]
    Attach(#[from] AttachError),

    #[error("Stream: {0}")]
    Relay(#[from] RelayError),
}

impl PipeError {
    /// Name of the phase that failed, as shown to the caller.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Provision(_) => "createBuilderPod",
            Self::Attach(_) => "NewSPDYExecutor",
            Self::Relay(_) => "Stream",
        }
    }

    /// HTTP status for this failure.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Provision(ProvisionError::Template(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Provision(ProvisionError::Create { .. }) => StatusCode::BAD_GATEWAY,
            Self::Provision(ProvisionError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Provision(ProvisionError::UnitFailed { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Attach(_) => StatusCode::BAD_GATEWAY,
            Self::Relay(RelayError::Source(_)) => StatusCode::BAD_REQUEST,
            Self::Relay(RelayError::Sink { .. } | RelayError::Finalize(_)) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Relay(RelayError::Cancelled { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Relay(RelayError::DeadlineExceeded { .. }) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_prefixes_display() {
        let err = PipeError::from(AttachError::StdinUnavailable("bsdtar-1".to_string()));
        assert_eq!(err.phase(), "NewSPDYExecutor");
        assert!(err.to_string().starts_with("NewSPDYExecutor: "));

        let err = PipeError::from(RelayError::Finalize("boom".to_string()));
        assert_eq!(err.to_string(), "Stream: finalizing attach session: boom");
    }

    #[test]
    fn status_codes_distinguish_failures() {
        let create = PipeError::from(ProvisionError::Create {
            name: "bsdtar-1".to_string(),
            source: ControlPlaneError::Api {
                operation: "create pod",
                reason: "forbidden".to_string(),
            },
        });
        assert_eq!(create.status_code(), StatusCode::BAD_GATEWAY);

        let timeout = PipeError::from(ProvisionError::Timeout {
            name: "bsdtar-1".to_string(),
            waited: Duration::from_secs(60),
            last_phase: UnitPhase::Pending,
            last_error: None,
        });
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let source = PipeError::from(RelayError::Source(std::io::Error::other("reset")));
        assert_eq!(source.status_code(), StatusCode::BAD_REQUEST);

        let template = PipeError::from(ProvisionError::from(TemplateError::NoContainers));
        assert_eq!(template.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn timeout_message_includes_last_error() {
        let err = ProvisionError::Timeout {
            name: "bsdtar-1".to_string(),
            waited: Duration::from_secs(2),
            last_phase: UnitPhase::Pending,
            last_error: Some("connection refused".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("timed out"), "got: {msg}");
        assert!(msg.contains("last phase: Pending"), "got: {msg}");
        assert!(msg.contains("connection refused"), "got: {msg}");
    }
}
