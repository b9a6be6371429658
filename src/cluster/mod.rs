//! Cluster control-plane abstraction.
//!
//! The orchestrator only needs four capabilities from the cluster: create a
//! pod, read its phase, delete it, and attach to its stdin. [`ControlPlane`]
//! captures exactly that so the provisioning and relay logic can run against
//! the real API server ([`KubeControlPlane`]) or a scripted stub in tests.

mod kubernetes;
mod session;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;

use crate::error::ControlPlaneError;

pub use self::kubernetes::KubeControlPlane;
pub use self::session::{AttachSession, SessionCompletion};

/// Lifecycle phase of a worker pod, as reported by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl UnitPhase {
    /// Map a pod's `status.phase`. A pod without a reported phase has not
    /// been scheduled yet and counts as pending.
    pub fn from_phase(phase: Option<&str>) -> Self {
        match phase {
            None | Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            Some(_) => Self::Unknown,
        }
    }

    /// Read the phase out of a pod object.
    pub fn of(pod: &Pod) -> Self {
        Self::from_phase(pod.status.as_ref().and_then(|s| s.phase.as_deref()))
    }

    /// Whether the pod can never become `Running` again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to a worker pod held after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitRef {
    pub namespace: String,
    pub name: String,
}

impl UnitRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for UnitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Which streams to request when attaching to a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachOptions {
    /// Target container; `None` lets the API server pick the pod's default.
    pub container: Option<String>,
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
}

impl AttachOptions {
    /// Stdin only, no output capture and no tty.
    pub fn stdin_only() -> Self {
        Self {
            container: None,
            stdin: true,
            stdout: false,
            stderr: false,
            tty: false,
        }
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

/// Capabilities the orchestrator needs from the cluster.
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Human-readable name for this backend.
    fn name(&self) -> &'static str;

    /// Submit a pod for creation. The pod's `metadata.name` must be set.
    async fn create_unit(&self, namespace: &str, pod: &Pod) -> Result<UnitRef, ControlPlaneError>;

    /// Fetch the pod's current phase.
    async fn unit_phase(&self, unit: &UnitRef) -> Result<UnitPhase, ControlPlaneError>;

    /// Delete the pod. Deleting a pod that is already gone is not an error.
    async fn delete_unit(&self, unit: &UnitRef) -> Result<(), ControlPlaneError>;

    /// Open an attach session to the pod.
    async fn attach(
        &self,
        unit: &UnitRef,
        options: &AttachOptions,
    ) -> Result<AttachSession, ControlPlaneError>;
}
