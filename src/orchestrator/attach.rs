//! Opening stdin attach sessions to running worker pods.

use std::sync::Arc;

use crate::cluster::{AttachOptions, AttachSession, ControlPlane};
use crate::error::AttachError;
use crate::orchestrator::provisioner::ProvisionedUnit;

/// Negotiates stdin-only attach sessions.
///
/// Takes a [`ProvisionedUnit`] so a session can only be opened for a pod
/// that was observed running.
pub struct AttachOpener {
    control_plane: Arc<dyn ControlPlane>,
}

impl AttachOpener {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    /// Perform the attach handshake. Not retried; any failure is returned
    /// as is.
    pub async fn open(&self, unit: &ProvisionedUnit) -> Result<AttachSession, AttachError> {
        let options = AttachOptions::stdin_only().container(unit.container());

        let session = self
            .control_plane
            .attach(unit.unit(), &options)
            .await
            .map_err(|e| AttachError::Handshake {
                name: unit.unit().name.clone(),
                source: e,
            })?;

        if !session.has_stdin() {
            return Err(AttachError::StdinUnavailable(unit.unit().name.clone()));
        }

        tracing::debug!(unit = %unit.unit(), container = unit.container(), "Attached to worker stdin");
        Ok(session)
    }
}
