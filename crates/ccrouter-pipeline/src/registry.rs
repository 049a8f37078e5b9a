//! Registry of stage strategies, keyed by `(StageKind, name)`
//!
//! Replaces name -> constructor `match` dispatch with a populated-at-startup
//! table: every strategy implementation registers itself once, and the
//! factory looks strategies up by kind and name instead of branching on them.

use std::sync::Arc;
use std::time::Duration;

use ccrouter_core::HeaderRule;
use dashmap::DashMap;
use secrecy::SecretString;
use url::Url;

use crate::error::PipelineError;
use crate::module::{Module, StageKind};

/// Per-stage construction parameters derived from a `RouteEntry` by the factory
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Provider name, for logging and pipeline identity
    pub provider_name: String,
    /// Base URL of the upstream API
    pub api_base_url: Url,
    /// Fully-resolved URL the Server stage sends requests to, derived from
    /// `api_base_url`, `declared_protocol`, and `target_model`
    pub endpoint_url: Url,
    /// Credential for this pipeline's api-key-index
    pub api_key: SecretString,
    /// Concrete upstream model name
    pub target_model: String,
    /// Default max-tokens hint, when the client didn't supply one
    pub max_tokens: Option<u32>,
    /// Header rules applied by the ServerCompatibility stage
    pub header_rules: Vec<HeaderRule>,
    /// Opaque strategy-specific options (`server_compatibility.options` in config)
    pub compatibility_options: serde_json::Value,
    /// Per-request upstream timeout
    pub timeout: Duration,
}

type Constructor = Arc<dyn Fn(&StageConfig) -> Result<Arc<dyn Module>, PipelineError> + Send + Sync>;

/// Process-wide table of stage strategy constructors
#[derive(Default)]
pub struct StageRegistry {
    constructors: DashMap<(StageKind, String), Constructor>,
}

impl StageRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy under `(kind, name)`, replacing any prior registration
    pub fn register<F>(&self, kind: StageKind, name: &str, ctor: F)
    where
        F: Fn(&StageConfig) -> Result<Arc<dyn Module>, PipelineError> + Send + Sync + 'static,
    {
        self.constructors.insert((kind, name.to_owned()), Arc::new(ctor));
    }

    /// Build a Module from its registered constructor
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` if no strategy is registered under
    /// `(kind, name)`, or whatever error the constructor itself returns.
    pub fn construct(&self, kind: StageKind, name: &str, cfg: &StageConfig) -> Result<Arc<dyn Module>, PipelineError> {
        let ctor = self
            .constructors
            .get(&(kind, name.to_owned()))
            .ok_or_else(|| PipelineError::ConfigurationInvalid(format!("no {kind:?} strategy registered under '{name}'")))?;
        ctor(cfg)
    }

    /// Whether a strategy is registered under `(kind, name)`
    pub fn contains(&self, kind: StageKind, name: &str) -> bool {
        self.constructors.contains_key(&(kind, name.to_owned()))
    }
}
