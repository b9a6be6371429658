//! One request end to end: provision, attach, relay, clean up.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ControlPlane, UnitRef};
use crate::config::Config;
use crate::error::PipeError;
use crate::orchestrator::attach::AttachOpener;
use crate::orchestrator::provisioner::UnitProvisioner;
use crate::orchestrator::relay::{RelayPolicy, relay};
use crate::template::UnitTemplate;

/// Summary of a successful pipe.
#[derive(Debug, Clone)]
pub struct PipeOutcome {
    pub unit: UnitRef,
    /// When the pod was created.
    pub created_at: DateTime<Utc>,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Runs the three phases of a pipe request in strict order.
///
/// Shared by all requests; every call to [`Pipeline::run`] gets its own pod.
pub struct Pipeline {
    template: Arc<UnitTemplate>,
    provisioner: UnitProvisioner,
    opener: AttachOpener,
    relay: RelayPolicy,
}

impl Pipeline {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        template: Arc<UnitTemplate>,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            template,
            provisioner: UnitProvisioner::new(
                Arc::clone(&control_plane),
                &config.cluster,
                config.provisioner.clone(),
            ),
            opener: AttachOpener::new(control_plane),
            relay: RelayPolicy::new(&config.relay, shutdown),
        }
    }

    /// Stream `source` into a fresh worker pod.
    ///
    /// Each phase starts only after the previous one succeeded. The pod is
    /// released on every path once it exists.
    pub async fn run<R>(&self, source: &mut R) -> Result<PipeOutcome, PipeError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let unit = self.provisioner.provision(&self.template).await?;

        let session = match self.opener.open(&unit).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(unit = %unit.unit(), error = %e, "Attach failed");
                unit.release().await;
                return Err(e.into());
            }
        };

        let result = relay(source, session, &self.relay).await;
        let unit_ref = unit.unit().clone();
        let created_at = unit.created_at();
        unit.release().await;

        let report = result.inspect_err(|e| {
            tracing::warn!(unit = %unit_ref, error = %e, "Relay failed");
        })?;

        tracing::info!(
            unit = %unit_ref,
            bytes = report.bytes,
            elapsed_ms = report.elapsed.as_millis() as u64,
            pod_age_ms = (Utc::now() - created_at).num_milliseconds(),
            "Relay complete"
        );

        Ok(PipeOutcome {
            unit: unit_ref,
            created_at,
            bytes: report.bytes,
            elapsed: report.elapsed,
        })
    }
}
