#![allow(clippy::must_use_candidate)]

mod env;
pub mod headers;
pub mod health;
mod loader;
pub mod providers;
pub mod server;
pub mod telemetry;

use secrecy::SecretString;
use serde::Deserialize;

pub use headers::*;
pub use health::*;
pub use providers::{ApiKeyConfig, BlacklistConfig, ProviderConfig, ProviderProtocol, RouteMap, ServerCompatibilityConfig};
pub use server::*;
pub use telemetry::TelemetryConfig;

/// Top-level ccrouter configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Upstream providers
    #[serde(rename = "Providers")]
    pub providers: Vec<ProviderConfig>,
    /// Primary virtual-model route-strings
    #[serde(default)]
    pub router: RouteMap,
    /// Lower-priority route-strings appended after `router` for the same virtual model
    #[serde(default)]
    pub security: RouteMap,
    /// Front-facing HTTP server
    #[serde(default)]
    pub server: ServerConfig,
    /// Bearer token clients must present on the front-facing endpoint
    #[serde(rename = "APIKEY")]
    pub api_key: SecretString,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
    /// Model names that get the long-context upstream timeout instead of the default
    #[serde(default)]
    pub long_context_models: Vec<String>,
}
