use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, expansion or parsing
    /// fails, or the result does not validate
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml(&raw)
    }

    /// Parse and validate configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion or parsing fails, or the result does not validate
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if no provider is configured or a provider entry is invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("at least one generation provider must be configured");
        }

        for (id, provider) in &self.providers {
            if id.trim().is_empty() || id.contains('/') {
                anyhow::bail!("invalid provider id '{id}': must be non-empty and must not contain '/'");
            }

            if let Some(ref poll) = provider.poll
                && poll.max_attempts == Some(0)
            {
                anyhow::bail!("provider '{id}': poll.max_attempts must be at least 1");
            }

            if let Some(ref base_url) = provider.base_url {
                url::Url::parse(base_url)
                    .map_err(|e| anyhow::anyhow!("provider '{id}': invalid base_url '{base_url}': {e}"))?;
            }

            if provider.api_key_env.iter().any(|name| name.trim().is_empty()) {
                anyhow::bail!("provider '{id}': api_key_env entries must not be empty");
            }
        }

        if self.storage.upload_root.trim_matches('/').is_empty() || self.storage.upload_root.contains("..") {
            anyhow::bail!("storage.upload_root must be a relative directory name");
        }

        if let Some(ref telemetry) = self.telemetry
            && !(0.0..=1.0).contains(&telemetry.sampling_rate)
        {
            anyhow::bail!("telemetry.sampling_rate must be between 0.0 and 1.0");
        }

        Ok(())
    }
}
