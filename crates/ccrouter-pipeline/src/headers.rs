//! Converts the raw, string-shaped header rules from user config into the
//! validated `ccrouter_core::HeaderRule` the ServerCompatibility stage applies

use ccrouter_config::headers::HeaderRuleConfig;
use ccrouter_core::headers::{HeaderForward, HeaderInsert, HeaderRemove, HeaderRenameDuplicate, HeaderRule, NameOrPattern, ValidHeaderName, ValidHeaderValue};
use tracing::warn;

/// Parse a provider's configured header rules, dropping (and warning about)
/// any rule whose header name or value doesn't validate as an HTTP token
pub fn parse_header_rules(configs: &[HeaderRuleConfig]) -> Vec<HeaderRule> {
    configs.iter().filter_map(|c| parse_one(c).or_else(|| { warn!("dropping invalid header rule"); None })).collect()
}

fn parse_one(config: &HeaderRuleConfig) -> Option<HeaderRule> {
    match config {
        HeaderRuleConfig::Forward(f) => Some(HeaderRule::Forward(HeaderForward {
            name: name_or_pattern(&f.name)?,
            rename: f.rename.as_deref().and_then(header_name),
            default: f.default.as_deref().and_then(header_value),
        })),
        HeaderRuleConfig::Insert(i) => Some(HeaderRule::Insert(HeaderInsert {
            name: header_name(&i.name)?,
            value: header_value(&i.value)?,
        })),
        HeaderRuleConfig::Remove(r) => Some(HeaderRule::Remove(HeaderRemove { name: name_or_pattern(&r.name)? })),
        HeaderRuleConfig::RenameDuplicate(d) => Some(HeaderRule::RenameDuplicate(HeaderRenameDuplicate {
            name: header_name(&d.name)?,
            rename: header_name(&d.rename)?,
            default: d.default.as_deref().and_then(header_value),
        })),
    }
}

fn header_name(raw: &str) -> Option<ValidHeaderName> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned())).ok()
}

fn header_value(raw: &str) -> Option<ValidHeaderValue> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned())).ok()
}

fn name_or_pattern(raw: &str) -> Option<NameOrPattern> {
    serde_json::from_value(serde_json::Value::String(raw.to_owned())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_invalid_rule_and_keeps_valid_ones() {
        let configs = vec![
            HeaderRuleConfig::Insert(ccrouter_config::headers::HeaderInsertConfig {
                name: "x-api-key".to_owned(),
                value: "secret".to_owned(),
            }),
            HeaderRuleConfig::Insert(ccrouter_config::headers::HeaderInsertConfig {
                name: "not a valid header name!!".to_owned(),
                value: "v".to_owned(),
            }),
        ];
        let rules = parse_header_rules(&configs);
        assert_eq!(rules.len(), 1);
    }
}
