//! PipelineFactory: builds a `Pipeline` from a `RouteEntry`, selecting each
//! stage's strategy by the selection tables below and resolving the
//! Server stage's concrete request URL

use std::sync::Arc;
use std::time::Duration;

use ccrouter_config::ProviderProtocol;
use url::Url;

use crate::error::PipelineError;
use crate::module::{Module, StageKind};
use crate::pipeline::{pipeline_id, Pipeline, PipelineMetadata};
use crate::preprocessor::RouteEntry;
use crate::registry::{StageConfig, StageRegistry};
use crate::stages;

/// Default per-request upstream timeout, overridden per route when the
/// config specifies a distinct long-context timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Builds pipelines from `RouteEntry` rows via a shared `StageRegistry`
pub struct PipelineFactory {
    registry: StageRegistry,
}

impl Default for PipelineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineFactory {
    /// A factory with every built-in stage strategy registered
    pub fn new() -> Self {
        let registry = StageRegistry::new();
        stages::transformer::register_all(&registry);
        stages::protocol::register_all(&registry);
        stages::server_compat::register_all(&registry);
        stages::server::register_all(&registry);
        Self { registry }
    }

    /// Assemble an un-handshaken `Pipeline` for one `RouteEntry`
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` if any selected strategy name has no
    /// registered constructor, or if the endpoint URL cannot be built.
    pub fn build(&self, entry: &RouteEntry) -> Result<Pipeline, PipelineError> {
        let protocol_name = protocol_strategy_name(entry.declared_protocol);
        let transformer_name = entry.declared_transformer.clone();
        let server_compatibility_name = if self.registry.contains(StageKind::ServerCompatibility, &entry.declared_server_compatibility) {
            entry.declared_server_compatibility.clone()
        } else {
            "passthrough".to_owned()
        };

        let endpoint_url = resolve_endpoint_url(&entry.api_base_url, entry.declared_protocol, &entry.target_model)?;
        let server_name = stages::server::strategy_for_scheme(&endpoint_url).to_owned();

        let cfg = StageConfig {
            provider_name: entry.provider.clone(),
            api_base_url: entry.api_base_url.clone(),
            endpoint_url: endpoint_url.clone(),
            api_key: entry.api_key.clone(),
            target_model: entry.target_model.clone(),
            max_tokens: entry.max_tokens,
            header_rules: entry.header_rules.clone(),
            compatibility_options: serde_json::Value::Null,
            timeout: DEFAULT_TIMEOUT,
        };

        let transformer = self.registry.construct(StageKind::Transformer, &transformer_name, &cfg)?;
        let protocol = self.registry.construct(StageKind::Protocol, protocol_name, &cfg)?;
        let server_compatibility = self.registry.construct(StageKind::ServerCompatibility, &server_compatibility_name, &cfg)?;
        let server = self.registry.construct(StageKind::Server, &server_name, &cfg)?;

        let stages: [Arc<dyn Module>; 4] = [transformer, protocol, server_compatibility, server];

        let metadata = PipelineMetadata {
            pipeline_id: pipeline_id(&entry.provider, &entry.target_model, entry.api_key_index),
            virtual_model: entry.virtual_model.clone(),
            provider: entry.provider.clone(),
            target_model: entry.target_model.clone(),
            api_key_index: entry.api_key_index,
            endpoint_url,
            transformer_name,
            protocol_name: protocol_name.to_owned(),
            server_compatibility_name,
            server_name,
        };

        Ok(Pipeline::new(metadata, stages, DEFAULT_TIMEOUT))
    }
}

fn protocol_strategy_name(protocol: ProviderProtocol) -> &'static str {
    match protocol {
        ProviderProtocol::Openai => "openai",
        ProviderProtocol::Anthropic => "anthropic",
        ProviderProtocol::Gemini => "gemini",
    }
}

/// Build the concrete per-protocol request URL from a provider's base URL
fn resolve_endpoint_url(base_url: &Url, protocol: ProviderProtocol, target_model: &str) -> Result<Url, PipelineError> {
    let mut url = base_url.clone();
    let trimmed = url.path().trim_end_matches('/').to_owned();

    match protocol {
        ProviderProtocol::Openai => {
            url.set_path(&format!("{trimmed}/chat/completions"));
        }
        ProviderProtocol::Anthropic => {
            url.set_path(&format!("{trimmed}/v1/messages"));
        }
        ProviderProtocol::Gemini => {
            url.set_path(&format!("{trimmed}/v1beta/models/{target_model}:generateContent"));
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_endpoint_appends_chat_completions() {
        let base: Url = "https://api.openai.com/v1".parse().unwrap();
        let url = resolve_endpoint_url(&base, ProviderProtocol::Openai, "gpt-4o").unwrap();
        assert_eq!(url.as_str(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn gemini_endpoint_embeds_model_name() {
        let base: Url = "https://generativelanguage.googleapis.com".parse().unwrap();
        let url = resolve_endpoint_url(&base, ProviderProtocol::Gemini, "gemini-1.5-pro").unwrap();
        assert_eq!(url.as_str(), "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent");
    }

    #[test]
    fn anthropic_endpoint_appends_v1_messages() {
        let base: Url = "https://api.anthropic.com".parse().unwrap();
        let url = resolve_endpoint_url(&base, ProviderProtocol::Anthropic, "claude-3-opus").unwrap();
        assert_eq!(url.as_str(), "https://api.anthropic.com/v1/messages");
    }
}
