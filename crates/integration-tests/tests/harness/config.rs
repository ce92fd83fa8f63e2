//! Programmatic configuration builder for integration tests

use std::net::SocketAddr;
use std::path::Path;

use foundry_config::{Config, PollConfig, ProviderConfig, ProviderType, ServerConfig, StorageConfig};
use indexmap::IndexMap;
use secrecy::SecretString;

/// Key every mock provider accepts
pub const TEST_KEY: &str = "test-key-0000";

/// Key every mock provider answers with 401
pub const REJECTED_KEY: &str = "bad-key-0000";

/// Environment variable that is never set, so no ambient key leaks in
const UNSET_KEY_VAR: &str = "FOUNDRY_INTEGRATION_UNSET_KEY";

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder storing artifacts under `project_root`
    pub fn new(project_root: &Path) -> Self {
        Self {
            config: Config {
                server: ServerConfig {
                    listen_address: Some(SocketAddr::from(([127, 0, 0, 1], 0))),
                    ..ServerConfig::default()
                },
                storage: StorageConfig {
                    project_root: project_root.to_path_buf(),
                    ..StorageConfig::default()
                },
                providers: IndexMap::new(),
                telemetry: None,
            },
        }
    }

    /// Add a provider pointed at a mock backend, with a valid key and fast polling
    pub fn with_provider(self, id: &str, provider_type: ProviderType, base_url: &str) -> Self {
        self.with_provider_key(id, provider_type, base_url, Some(TEST_KEY))
    }

    /// Add a provider with an explicit key, or none at all
    pub fn with_provider_key(
        mut self,
        id: &str,
        provider_type: ProviderType,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Self {
        self.config.providers.insert(
            id.to_owned(),
            ProviderConfig {
                provider_type,
                api_key: api_key.map(SecretString::from),
                api_key_env: vec![UNSET_KEY_VAR.to_owned()],
                base_url: Some(base_url.to_owned()),
                default_model: None,
                poll: Some(PollConfig {
                    interval_ms: Some(10),
                    max_attempts: Some(5),
                    transient_retries: Some(1),
                    backoff_ms: Some(1),
                }),
            },
        );
        self
    }

    /// Limit how many status checks a provider gets
    pub fn with_max_attempts(mut self, id: &str, max_attempts: u32) -> Self {
        if let Some(poll) = self
            .config
            .providers
            .get_mut(id)
            .and_then(|provider| provider.poll.as_mut())
        {
            poll.max_attempts = Some(max_attempts);
        }
        self
    }

    /// Disable health endpoint
    pub fn without_health(mut self) -> Self {
        self.config.server.health.enabled = false;
        self
    }

    /// Build the final config
    pub fn build(self) -> Config {
        self.config.validate().expect("test config is valid");
        self.config
    }
}
