use serde::Deserialize;

use crate::health::HealthConfig;

/// Listen address and ambient health endpoint for the front-facing HTTP server
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP port to bind
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Health check endpoint
    #[serde(default)]
    pub health: HealthConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            health: HealthConfig::default(),
        }
    }
}

const fn default_port() -> u16 {
    5506
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}
