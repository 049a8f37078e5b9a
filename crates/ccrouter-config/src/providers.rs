use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::headers::HeaderRuleConfig;

/// Configuration for a single upstream provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider name, referenced by route-strings in `router`/`security`
    pub name: String,
    /// Wire protocol the upstream speaks
    #[serde(default)]
    pub protocol: ProviderProtocol,
    /// Base URL of the upstream API
    pub api_base_url: Url,
    /// One key, or several for multi-key fan-out, each becoming its own pipeline
    pub api_key: ApiKeyConfig,
    /// Model identifiers this provider may be routed to
    pub models: Vec<String>,
    /// Server-compatibility strategy selection and its options
    #[serde(default)]
    pub server_compatibility: Option<ServerCompatibilityConfig>,
    /// Default max-tokens hint passed to the transformer stage
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Header rules applied by the server-compatibility stage
    #[serde(default)]
    pub headers: Vec<HeaderRuleConfig>,
    /// Per-provider blacklist thresholds; falls back to defaults when absent
    #[serde(default)]
    pub blacklist: BlacklistConfig,
}

/// Wire protocol spoken by an upstream provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderProtocol {
    /// OpenAI-compatible chat completions API
    #[default]
    Openai,
    /// Anthropic Messages API
    Anthropic,
    /// Google Gemini generateContent API
    Gemini,
}

/// A single API key, or an array of keys for multi-key fan-out
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiKeyConfig {
    /// One credential
    Single(SecretString),
    /// Several independent credentials, each handshaken and blacklisted separately
    Multiple(Vec<SecretString>),
}

impl ApiKeyConfig {
    /// Every configured key in index order
    pub fn keys(&self) -> Vec<&SecretString> {
        match self {
            Self::Single(key) => vec![key],
            Self::Multiple(keys) => keys.iter().collect(),
        }
    }
}

/// Selects and configures the server-compatibility strategy for a provider
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerCompatibilityConfig {
    /// Strategy name (e.g. "lmstudio", "ollama", "vllm"); unknown names fall back to passthrough
    #[serde(rename = "use")]
    pub use_: String,
    /// Strategy-specific options, interpreted by the selected strategy
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Thresholds controlling when the router blacklists a pipeline
///
/// Mirrors the teacher's `CircuitBreakerConfig` defaulting idiom, generalized
/// to the router's three distinct blacklist policies (transient, rate-limit,
/// auth-failure) instead of a single open/half-open/closed breaker.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlacklistConfig {
    /// Consecutive transient errors before a pipeline is blacklisted
    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,
    /// Blacklist duration after tripping the transient-error threshold
    #[serde(default = "default_error_blacklist_seconds")]
    pub error_blacklist_seconds: u64,
    /// Blacklist duration applied unconditionally on a rate-limit response
    #[serde(default = "default_rate_limit_blacklist_seconds")]
    pub rate_limit_blacklist_seconds: u64,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            error_threshold: default_error_threshold(),
            error_blacklist_seconds: default_error_blacklist_seconds(),
            rate_limit_blacklist_seconds: default_rate_limit_blacklist_seconds(),
        }
    }
}

const fn default_error_threshold() -> u32 {
    3
}

const fn default_error_blacklist_seconds() -> u64 {
    300
}

const fn default_rate_limit_blacklist_seconds() -> u64 {
    60
}

/// A virtual-model routing table value: `"provider,model;provider2,model2"`
pub type RouteMap = IndexMap<String, String>;
