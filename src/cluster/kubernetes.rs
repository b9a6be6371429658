//! Kubernetes-backed control plane.

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, AttachParams, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, instrument};

use crate::cluster::{AttachOptions, AttachSession, ControlPlane, UnitPhase, UnitRef};
use crate::error::ControlPlaneError;

/// Control plane that talks to a Kubernetes API server.
///
/// The underlying [`Client`] is cheap to clone and shared by all requests.
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from a kubeconfig file, or infer the configuration
    /// (in-cluster service account, then `~/.kube/config`) when no path is
    /// given.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, ControlPlaneError> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ControlPlaneError::Bootstrap(format!(
                        "failed to read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ControlPlaneError::Bootstrap(e.to_string()))?
            }
            None => Config::infer()
                .await
                .map_err(|e| ControlPlaneError::Bootstrap(e.to_string()))?,
        };

        tracing::info!(cluster_url = %config.cluster_url, "Connecting to cluster");

        let client =
            Client::try_from(config).map_err(|e| ControlPlaneError::Bootstrap(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn api_error(operation: &'static str, unit: &UnitRef, err: kube::Error) -> ControlPlaneError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => ControlPlaneError::NotFound {
            namespace: unit.namespace.clone(),
            name: unit.name.clone(),
        },
        other => ControlPlaneError::Api {
            operation,
            reason: other.to_string(),
        },
    }
}

fn attach_params(options: &AttachOptions) -> AttachParams {
    let mut params = AttachParams::default()
        .stdin(options.stdin)
        .stdout(options.stdout)
        .stderr(options.stderr)
        .tty(options.tty);
    if let Some(ref container) = options.container {
        params = params.container(container.clone());
    }
    params
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    #[instrument(skip(self, pod), fields(name = ?pod.metadata.name))]
    async fn create_unit(&self, namespace: &str, pod: &Pod) -> Result<UnitRef, ControlPlaneError> {
        debug!("POST pods");

        let created = self
            .pods(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| ControlPlaneError::Api {
                operation: "create pod",
                reason: e.to_string(),
            })?;

        let name = created
            .metadata
            .name
            .ok_or_else(|| ControlPlaneError::Api {
                operation: "create pod",
                reason: "API server returned a pod without a name".to_string(),
            })?;

        Ok(UnitRef::new(namespace, name))
    }

    #[instrument(skip(self), fields(unit = %unit))]
    async fn unit_phase(&self, unit: &UnitRef) -> Result<UnitPhase, ControlPlaneError> {
        debug!("GET pod");

        let pod = self
            .pods(&unit.namespace)
            .get(&unit.name)
            .await
            .map_err(|e| api_error("get pod", unit, e))?;

        Ok(UnitPhase::of(&pod))
    }

    #[instrument(skip(self), fields(unit = %unit))]
    async fn delete_unit(&self, unit: &UnitRef) -> Result<(), ControlPlaneError> {
        debug!("DELETE pod");

        let params = DeleteParams {
            grace_period_seconds: Some(0),
            ..Default::default()
        };

        match self.pods(&unit.namespace).delete(&unit.name, &params).await {
            Ok(_) => Ok(()),
            Err(e) => match api_error("delete pod", unit, e) {
                ControlPlaneError::NotFound { .. } => Ok(()),
                other => Err(other),
            },
        }
    }

    #[instrument(skip(self, options), fields(unit = %unit))]
    async fn attach(
        &self,
        unit: &UnitRef,
        options: &AttachOptions,
    ) -> Result<AttachSession, ControlPlaneError> {
        debug!("POST pods/attach");

        let mut attached = self
            .pods(&unit.namespace)
            .attach(&unit.name, &attach_params(options))
            .await
            .map_err(|e| ControlPlaneError::Attach(e.to_string()))?;

        let stdin = attached
            .stdin()
            .map(|w| Box::new(w) as Box<dyn tokio::io::AsyncWrite + Send + Unpin>);

        let completion = Box::pin(async move { attached.join().await.map_err(|e| e.to_string()) });

        Ok(AttachSession::new(stdin, completion))
    }
}
