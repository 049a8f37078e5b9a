use std::path::Path;

use secrecy::ExposeSecret;

use crate::Config;

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Reads the file, expands `${VAR}`/`${VAR:default}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, JSON parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let expanded =
            crate::env::expand_env(&raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self =
            serde_json::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// Cross-checks between `router`/`security` route-strings and declared
    /// providers/models are the `ConfigPreprocessor`'s job, not this crate's;
    /// this validation only covers shape the config crate itself owns.
    ///
    /// # Errors
    ///
    /// Returns an error if providers are missing, duplicated, or malformed
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_has_providers()?;
        self.validate_provider_names_unique()?;
        self.validate_api_key()?;
        self.validate_has_routes()?;
        Ok(())
    }

    fn validate_has_providers(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("at least one provider must be configured");
        }
        Ok(())
    }

    fn validate_provider_names_unique(&self) -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::with_capacity(self.providers.len());
        for provider in &self.providers {
            if provider.models.is_empty() {
                anyhow::bail!("provider '{}' declares no models", provider.name);
            }
            if !seen.insert(provider.name.as_str()) {
                anyhow::bail!("duplicate provider name: '{}'", provider.name);
            }
        }
        Ok(())
    }

    fn validate_api_key(&self) -> anyhow::Result<()> {
        if self.api_key.expose_secret().is_empty() {
            anyhow::bail!("APIKEY must not be empty");
        }
        Ok(())
    }

    fn validate_has_routes(&self) -> anyhow::Result<()> {
        if self.router.is_empty() {
            anyhow::bail!("at least one virtual model must be declared under 'router'");
        }
        Ok(())
    }
}
