use std::sync::OnceLock;

use regex::Regex;

/// Expand `${VAR}` and `${VAR:default}` placeholders in a raw JSON config string
///
/// This operates on the raw config text before deserialization, so config
/// structs use plain String/SecretString fields with no knowledge of the
/// substitution syntax. A missing variable with no default is a hard error.
pub fn expand_env(input: &str) -> Result<String, String> {
    fn re() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        // Group 1: variable name. Group 2: optional `:default` text (may be empty).
        RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").expect("must be valid regex"))
    }

    let mut result = String::with_capacity(input.len());
    let mut last_end = 0;

    for captures in re().captures_iter(input) {
        let overall = captures.get(0).expect("capture group 0 always matches");
        let var_name = captures.get(1).expect("capture group 1 required by pattern").as_str();
        let default_value = captures.get(2).map(|m| m.as_str());

        result.push_str(&input[last_end..overall.start()]);

        match std::env::var(var_name) {
            Ok(value) => result.push_str(&value),
            Err(_) => match default_value {
                Some(default) => result.push_str(default),
                None => return Err(format!("environment variable not found: `{var_name}`")),
            },
        }

        last_end = overall.end();
    }

    result.push_str(&input[last_end..]);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_placeholders() {
        let input = r#"{"key": "value"}"#;
        assert_eq!(expand_env(input).unwrap(), input);
    }

    #[test]
    fn single_env_var() {
        temp_env::with_var("TEST_VAR", Some("hello"), || {
            let result = expand_env(r#"{"key": "${TEST_VAR}"}"#).unwrap();
            assert_eq!(result, r#"{"key": "hello"}"#);
        });
    }

    #[test]
    fn multiple_env_vars() {
        let vars = [("FOO", Some("foo")), ("BAR", Some("bar"))];
        temp_env::with_vars(vars, || {
            let result = expand_env(r#"{"a": "${FOO}", "b": "${BAR}"}"#).unwrap();
            assert_eq!(result, r#"{"a": "foo", "b": "bar"}"#);
        });
    }

    #[test]
    fn missing_env_var() {
        temp_env::with_var_unset("MISSING_VAR", || {
            let err = expand_env(r#"{"key": "${MISSING_VAR}"}"#).unwrap_err();
            assert!(err.contains("MISSING_VAR"));
        });
    }

    #[test]
    fn default_used_when_var_missing() {
        temp_env::with_var_unset("OPTIONAL_VAR", || {
            let result = expand_env(r#"{"key": "${OPTIONAL_VAR:}"}"#).unwrap();
            assert_eq!(result, r#"{"key": ""}"#);
        });
    }

    #[test]
    fn default_not_used_when_var_present() {
        temp_env::with_var("OPTIONAL_VAR", Some("actual"), || {
            let result = expand_env(r#"{"key": "${OPTIONAL_VAR:fallback}"}"#).unwrap();
            assert_eq!(result, r#"{"key": "actual"}"#);
        });
    }

    #[test]
    fn default_with_nonempty_fallback() {
        temp_env::with_var_unset("MISSING_VAR", || {
            let result = expand_env(r#"{"key": "${MISSING_VAR:fallback}"}"#).unwrap();
            assert_eq!(result, r#"{"key": "fallback"}"#);
        });
    }

    #[test]
    fn missing_var_without_default_still_errors() {
        temp_env::with_var_unset("REQUIRED_VAR", || {
            let err = expand_env(r#"{"key": "${REQUIRED_VAR}"}"#).unwrap_err();
            assert!(err.contains("REQUIRED_VAR"));
        });
    }
}
