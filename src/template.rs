//! Worker pod template.
//!
//! A template is a pod manifest in JSON. It is parsed once at startup and
//! shared read-only by every request; each request stamps a fresh name onto
//! a clone of it.

use std::path::Path;

use k8s_openapi::api::core::v1::{Container, Pod};

use crate::error::TemplateError;

/// The built-in template: a `bsdtar` pod that extracts an archive read from
/// stdin.
pub const BUILTIN_TEMPLATE: &[u8] = include_bytes!("../assets/bsdtar.json");

/// Immutable pod definition used to instantiate worker pods.
#[derive(Debug, Clone)]
pub struct UnitTemplate {
    pod: Pod,
}

impl UnitTemplate {
    /// Parse a template from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TemplateError> {
        let pod: Pod = serde_json::from_slice(bytes)?;
        Ok(Self { pod })
    }

    /// The template compiled into the binary.
    pub fn builtin() -> Result<Self, TemplateError> {
        Self::from_slice(BUILTIN_TEMPLATE)
    }

    /// Load from `path`, or fall back to the built-in template.
    pub fn load(path: Option<&Path>) -> Result<Self, TemplateError> {
        let Some(path) = path else {
            return Self::builtin();
        };
        let bytes = std::fs::read(path).map_err(|e| TemplateError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_slice(&bytes)
    }

    #[cfg(test)]
    fn pod(&self) -> &Pod {
        &self.pod
    }

    /// Name prefix declared by the template: `metadata.name`, or
    /// `metadata.generateName` without its trailing dash.
    pub fn name_prefix(&self) -> Option<&str> {
        let meta = &self.pod.metadata;
        meta.name
            .as_deref()
            .or_else(|| meta.generate_name.as_deref().map(|g| g.trim_end_matches('-')))
            .filter(|p| !p.is_empty())
    }

    fn containers(&self) -> &[Container] {
        self.pod
            .spec
            .as_ref()
            .map(|s| s.containers.as_slice())
            .unwrap_or_default()
    }

    /// Resolve the container whose stdin the relay writes to.
    ///
    /// With no preference the first container is used. The container must
    /// declare `stdin: true`, otherwise attach would have nothing to write to.
    pub fn attach_container(&self, preferred: Option<&str>) -> Result<String, TemplateError> {
        let containers = self.containers();
        let container = match preferred {
            Some(name) => containers
                .iter()
                .find(|c| c.name == name)
                .ok_or_else(|| TemplateError::ContainerNotFound(name.to_string()))?,
            None => containers.first().ok_or(TemplateError::NoContainers)?,
        };

        if container.stdin != Some(true) {
            return Err(TemplateError::StdinDisabled(container.name.clone()));
        }
        Ok(container.name.clone())
    }

    /// Produce a concrete pod named `name`.
    ///
    /// Server-populated fields that may have been left in an exported
    /// manifest are cleared so the create call is accepted.
    pub fn instantiate(&self, name: &str) -> Result<Pod, TemplateError> {
        if self.containers().is_empty() {
            return Err(TemplateError::NoContainers);
        }

        let mut pod = self.pod.clone();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.generate_name = None;
        pod.metadata.namespace = None;
        pod.metadata.resource_version = None;
        pod.metadata.uid = None;
        pod.metadata.creation_timestamp = None;
        pod.status = None;
        Ok(pod)
    }
}
