use std::net::{IpAddr, SocketAddr};

use crate::config::helpers::{parse_optional_env, parse_string_env};
use crate::error::ConfigError;

/// HTTP front door settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8181,
        }
    }
}

impl ServerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: parse_string_env("PODPIPE_HOST", defaults.host)?,
            port: parse_optional_env("PODPIPE_PORT", defaults.port)?,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.host.parse().map_err(|e| ConfigError::InvalidValue {
            key: "PODPIPE_HOST".to_string(),
            message: format!("'{}' is not an IP address: {e}", self.host),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_listens_on_8181() {
        let addr = ServerConfig::default().socket_addr().unwrap();
        assert_eq!(addr.port(), 8181);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn hostname_is_rejected() {
        let config = ServerConfig {
            host: "localhost".to_string(),
            port: 8181,
        };
        assert!(config.socket_addr().is_err());
    }
}
