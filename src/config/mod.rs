//! Configuration for podpipe.
//!
//! Everything comes from environment variables. A `.env` file in the working
//! directory is loaded first via dotenvy, which never overwrites variables
//! that are already set.

pub(crate) mod helpers;
mod cluster;
mod server;

use crate::error::ConfigError;

pub use self::cluster::{ClusterConfig, ProvisionerConfig, RelayConfig};
pub use self::server::ServerConfig;

/// Main configuration for the service.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub cluster: ClusterConfig,
    pub provisioner: ProvisionerConfig,
    pub relay: RelayConfig,
}

impl Config {
    /// Load configuration from `.env` and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::resolve()
    }

    fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::resolve()?,
            cluster: ClusterConfig::resolve()?,
            provisioner: ProvisionerConfig::resolve()?,
            relay: RelayConfig::resolve()?,
        })
    }
}
