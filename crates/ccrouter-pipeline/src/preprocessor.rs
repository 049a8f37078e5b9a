//! ConfigPreprocessor: expands user config route-strings into a RoutingTable

use std::collections::HashMap;

use ccrouter_config::{BlacklistConfig, Config, ProviderConfig, ProviderProtocol};
use indexmap::IndexMap;
use secrecy::SecretString;
use tracing::warn;
use url::Url;

use crate::error::PipelineError;

/// One candidate pipeline for a virtual model, produced by expanding a route-string
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// Client-visible category this entry serves
    pub virtual_model: String,
    /// Provider name, as declared in `Providers`
    pub provider: String,
    /// Concrete upstream model name
    pub target_model: String,
    /// Index into the provider's `api_key` array this entry is bound to
    pub api_key_index: usize,
    /// The credential at that index
    pub api_key: SecretString,
    /// The provider's base URL
    pub api_base_url: Url,
    /// The provider's declared wire protocol
    pub declared_protocol: ProviderProtocol,
    /// Name of the ServerCompatibility strategy the factory should select
    pub declared_server_compatibility: String,
    /// Name of the Transformer strategy the factory should select
    pub declared_transformer: String,
    /// Default max-tokens hint from the provider config
    pub max_tokens: Option<u32>,
    /// Header rules from the provider config
    pub header_rules: Vec<ccrouter_core::HeaderRule>,
    /// Blacklist thresholds for the pipeline built from this entry
    pub blacklist: BlacklistConfig,
    /// Whether this entry came from the `security` section
    pub is_security_enhanced: bool,
    /// Unique within `virtual_model`; ties broken by declaration order
    pub priority: u32,
}

/// Virtual model name -> its candidate pipelines, in priority order
pub type RoutingTable = IndexMap<String, Vec<RouteEntry>>;

/// Reads the user configuration's `router`/`security` route-strings and expands them
pub struct ConfigPreprocessor;

impl ConfigPreprocessor {
    /// Build the RoutingTable that drives `PipelineManager::initialize_from_routing_table`
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationInvalid` if a virtual model ends up with no valid
    /// candidate after expansion (every one of its pairs referenced an
    /// unknown provider or a model the provider doesn't declare).
    pub fn build_routing_table(config: &Config) -> Result<RoutingTable, PipelineError> {
        let providers: HashMap<&str, &ProviderConfig> = config.providers.iter().map(|p| (p.name.as_str(), p)).collect();

        let mut table = RoutingTable::new();

        for (virtual_model, route_string) in &config.router {
            let entries = expand_route_string(virtual_model, route_string, &providers, false, 0)?;
            table.insert(virtual_model.clone(), entries);
        }

        for (virtual_model, route_string) in &config.security {
            let existing = table.entry(virtual_model.clone()).or_default();
            let next_priority = existing.len() as u32;
            let security_entries = expand_route_string(virtual_model, route_string, &providers, true, next_priority)?;
            existing.extend(security_entries);
        }

        Ok(table)
    }
}

fn expand_route_string(
    virtual_model: &str,
    route_string: &str,
    providers: &HashMap<&str, &ProviderConfig>,
    is_security_enhanced: bool,
    priority_offset: u32,
) -> Result<Vec<RouteEntry>, PipelineError> {
    let mut entries = Vec::new();
    let mut priority = priority_offset;

    for pair in route_string.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((provider_name, model_name)) = pair.split_once(',') else {
            warn!(virtual_model, pair, "malformed route-string pair, skipping");
            continue;
        };
        let (provider_name, model_name) = (provider_name.trim(), model_name.trim());

        let Some(provider) = providers.get(provider_name) else {
            warn!(virtual_model, provider = provider_name, "route references unknown provider, skipping");
            continue;
        };
        if !provider.models.iter().any(|m| m == model_name) {
            warn!(virtual_model, provider = provider_name, model = model_name, "route references undeclared model, skipping");
            continue;
        }

        let server_compatibility = provider
            .server_compatibility
            .as_ref()
            .map_or_else(|| "passthrough".to_owned(), |sc| sc.use_.clone());

        for (api_key_index, api_key) in provider.api_key.keys().into_iter().enumerate() {
            entries.push(RouteEntry {
                virtual_model: virtual_model.to_owned(),
                provider: provider.name.clone(),
                target_model: model_name.to_owned(),
                api_key_index,
                api_key: api_key.clone(),
                api_base_url: provider.api_base_url.clone(),
                declared_protocol: provider.protocol,
                declared_server_compatibility: server_compatibility.clone(),
                declared_transformer: transformer_for_protocol(provider.protocol),
                max_tokens: provider.max_tokens,
                header_rules: crate::headers::parse_header_rules(&provider.headers),
                blacklist: provider.blacklist.clone(),
                is_security_enhanced,
                priority,
            });
            priority += 1;
        }
    }

    if entries.is_empty() {
        return Err(PipelineError::ConfigurationInvalid(format!(
            "virtual model '{virtual_model}' has no valid route after expansion"
        )));
    }

    Ok(entries)
}

/// Which Transformer strategy the factory selects for a declared protocol
pub fn transformer_for_protocol(protocol: ProviderProtocol) -> String {
    match protocol {
        ProviderProtocol::Gemini => "anthropic-to-gemini".to_owned(),
        ProviderProtocol::Openai => "anthropic-to-openai".to_owned(),
        ProviderProtocol::Anthropic => "anthropic-passthrough".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use ccrouter_config::{ApiKeyConfig, BlacklistConfig};

    use super::*;

    fn provider(name: &str, keys: usize, models: &[&str]) -> ProviderConfig {
        ProviderConfig {
            name: name.to_owned(),
            protocol: ProviderProtocol::Openai,
            api_base_url: "https://example.invalid".parse().unwrap(),
            api_key: if keys == 1 {
                ApiKeyConfig::Single(SecretString::from("k0"))
            } else {
                ApiKeyConfig::Multiple((0..keys).map(|i| SecretString::from(format!("k{i}"))).collect())
            },
            models: models.iter().map(|s| (*s).to_owned()).collect(),
            server_compatibility: None,
            max_tokens: None,
            headers: Vec::new(),
            blacklist: BlacklistConfig::default(),
        }
    }

    #[test]
    fn single_key_single_pair_produces_one_entry() {
        let providers = HashMap::from([("openai", &provider("openai", 1, &["gpt-4o"]))]);
        let providers: HashMap<&str, &ProviderConfig> = providers.iter().map(|(k, v)| (*k, *v)).collect();
        let entries = expand_route_string("default", "openai,gpt-4o", &providers, false, 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].api_key_index, 0);
        assert_eq!(entries[0].priority, 0);
    }

    #[test]
    fn multi_key_fans_out_per_key() {
        let p = provider("qwen", 3, &["qwen-plus"]);
        let providers: HashMap<&str, &ProviderConfig> = HashMap::from([("qwen", &p)]);
        let entries = expand_route_string("default", "qwen,qwen-plus", &providers, false, 0).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.iter().map(|e| e.api_key_index).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn compound_route_expands_in_order_with_ascending_priority() {
        let a = provider("a", 1, &["m1"]);
        let b = provider("b", 2, &["m2"]);
        let providers: HashMap<&str, &ProviderConfig> = HashMap::from([("a", &a), ("b", &b)]);
        let entries = expand_route_string("longcontext", "a,m1;b,m2", &providers, false, 0).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.iter().map(|e| e.priority).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(entries[0].provider, "a");
        assert_eq!(entries[1].provider, "b");
        assert_eq!(entries[2].provider, "b");
    }

    #[test]
    fn unknown_pair_is_skipped_not_fatal_when_others_remain() {
        let a = provider("a", 1, &["m1"]);
        let providers: HashMap<&str, &ProviderConfig> = HashMap::from([("a", &a)]);
        let entries = expand_route_string("default", "bogus,m9;a,m1", &providers, false, 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].provider, "a");
    }

    #[test]
    fn no_valid_pair_is_a_hard_error() {
        let providers: HashMap<&str, &ProviderConfig> = HashMap::new();
        let result = expand_route_string("default", "bogus,m9", &providers, false, 0);
        assert!(result.is_err());
    }
}
