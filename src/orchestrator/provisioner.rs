//! Worker pod provisioning.
//!
//! Creates one uniquely named pod per request from the shared template and
//! waits, with a bounded poll, until the control plane reports it running.
//! The returned [`ProvisionedUnit`] owns the pod: it is deleted when the
//! guard is released or dropped, whichever comes first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::cluster::{ControlPlane, UnitPhase, UnitRef};
use crate::config::{ClusterConfig, ProvisionerConfig};
use crate::error::ProvisionError;
use crate::template::UnitTemplate;

/// Prefix used when neither the configuration nor the template names one.
pub const DEFAULT_NAME_PREFIX: &str = "worker";

/// A worker pod that has been observed in the `Running` phase.
///
/// Holding one is the only way to open an attach session. Unless cleanup is
/// disabled, the pod is deleted by [`ProvisionedUnit::release`], or in the
/// background if the guard is dropped without being released (for example
/// when the client disconnects mid-request).
pub struct ProvisionedUnit {
    unit: UnitRef,
    container: String,
    created_at: DateTime<Utc>,
    polls: u32,
    cleanup: Option<Arc<dyn ControlPlane>>,
}

impl ProvisionedUnit {
    pub fn unit(&self) -> &UnitRef {
        &self.unit
    }

    /// Container whose stdin receives the relayed bytes.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Wall-clock time the create call was accepted.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of status polls it took to observe `Running`.
    pub fn polls(&self) -> u32 {
        self.polls
    }

    /// Delete the pod now and wait for the API call to finish.
    pub async fn release(mut self) {
        if let Some(control_plane) = self.cleanup.take() {
            delete_unit(control_plane.as_ref(), &self.unit, self.created_at).await;
        }
    }

    /// Give up ownership: the pod is left running and never deleted by us.
    pub fn detach(mut self) -> UnitRef {
        self.cleanup = None;
        self.unit.clone()
    }
}

impl Drop for ProvisionedUnit {
    fn drop(&mut self) {
        let Some(control_plane) = self.cleanup.take() else {
            return;
        };
        let unit = self.unit.clone();
        let created_at = self.created_at;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    delete_unit(control_plane.as_ref(), &unit, created_at).await;
                });
            }
            Err(_) => {
                tracing::warn!(unit = %unit, "No runtime to delete worker pod; it must be removed manually");
            }
        }
    }
}

impl std::fmt::Debug for ProvisionedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionedUnit")
            .field("unit", &self.unit)
            .field("container", &self.container)
            .field("created_at", &self.created_at)
            .field("polls", &self.polls)
            .field("owned", &self.cleanup.is_some())
            .finish()
    }
}

async fn delete_unit(
    control_plane: &dyn ControlPlane,
    unit: &UnitRef,
    created_at: DateTime<Utc>,
) {
    let age_ms = (Utc::now() - created_at).num_milliseconds();
    match control_plane.delete_unit(unit).await {
        Ok(()) => tracing::info!(unit = %unit, age_ms, "Deleted worker pod"),
        Err(e) => {
            tracing::warn!(unit = %unit, error = %e, "Failed to delete worker pod (may require manual cleanup)")
        }
    }
}

/// `<prefix>-<uuid>`, where the prefix is `name_prefix`, else the
/// template's, else [`DEFAULT_NAME_PREFIX`]. Collisions are not checked for;
/// a v4 UUID makes them negligible.
pub fn generate_name(name_prefix: Option<&str>, template: &UnitTemplate) -> String {
    let prefix = name_prefix
        .or_else(|| template.name_prefix())
        .unwrap_or(DEFAULT_NAME_PREFIX);
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Creates worker pods and waits for them to start.
pub struct UnitProvisioner {
    control_plane: Arc<dyn ControlPlane>,
    namespace: String,
    name_prefix: Option<String>,
    container: Option<String>,
    config: ProvisionerConfig,
}

impl UnitProvisioner {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        cluster: &ClusterConfig,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            control_plane,
            namespace: cluster.namespace.clone(),
            name_prefix: cluster.name_prefix.clone(),
            container: cluster.container.clone(),
            config,
        }
    }

    pub fn generate_name(&self, template: &UnitTemplate) -> String {
        generate_name(self.name_prefix.as_deref(), template)
    }

    /// Create a pod from `template` and wait until it is running.
    ///
    /// Template problems are reported before any call to the control plane.
    /// A failed create is returned immediately. Once the pod exists, any
    /// failure deletes it (when cleanup is enabled) before returning.
    pub async fn provision(
        &self,
        template: &UnitTemplate,
    ) -> Result<ProvisionedUnit, ProvisionError> {
        let name = self.generate_name(template);
        let container = template.attach_container(self.container.as_deref())?;
        let pod = template.instantiate(&name)?;

        let unit = self
            .control_plane
            .create_unit(&self.namespace, &pod)
            .await
            .map_err(|e| ProvisionError::Create {
                name: name.clone(),
                source: e,
            })?;

        tracing::info!(unit = %unit, backend = self.control_plane.name(), "Created worker pod");

        let mut guard = ProvisionedUnit {
            unit,
            container,
            created_at: Utc::now(),
            polls: 0,
            cleanup: self
                .config
                .cleanup
                .then(|| Arc::clone(&self.control_plane)),
        };

        match self.wait_until_running(&guard.unit).await {
            Ok(polls) => {
                guard.polls = polls;
                tracing::info!(unit = %guard.unit, polls, "Worker pod running");
                Ok(guard)
            }
            Err(e) => {
                tracing::warn!(unit = %guard.unit, error = %e, "Worker pod did not start");
                guard.release().await;
                Err(e)
            }
        }
    }

    /// Poll the pod's phase until it is `Running` or the start budget runs
    /// out. The first poll happens immediately. Status fetch failures are
    /// tolerated and only reported as context if the budget runs out.
    async fn wait_until_running(&self, unit: &UnitRef) -> Result<u32, ProvisionError> {
        let started = Instant::now();
        let deadline = started + self.config.start_timeout;
        let mut last_phase = UnitPhase::Pending;
        let mut last_error: Option<String> = None;
        let mut polls = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProvisionError::Timeout {
                    name: unit.name.clone(),
                    waited: started.elapsed(),
                    last_phase,
                    last_error,
                });
            }

            polls += 1;
            match tokio::time::timeout(remaining, self.control_plane.unit_phase(unit)).await {
                Ok(Ok(UnitPhase::Running)) => return Ok(polls),
                Ok(Ok(phase)) => {
                    if phase != last_phase {
                        tracing::debug!(unit = %unit, phase = %phase, "Worker pod phase changed");
                    }
                    last_phase = phase;
                    if self.config.fail_fast && phase.is_terminal() {
                        return Err(ProvisionError::UnitFailed {
                            name: unit.name.clone(),
                            phase,
                        });
                    }
                }
                Ok(Err(e)) => {
                    tracing::debug!(unit = %unit, error = %e, "Pod status fetch failed, retrying");
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    last_error = Some("status request did not complete in time".to_string());
                }
            }

            let next = Instant::now() + self.config.poll_interval;
            tokio::time::sleep_until(next.min(deadline)).await;
        }
    }
}
