#![allow(clippy::must_use_candidate)]

mod env;
mod loader;
pub mod provider;
pub mod server;
pub mod storage;
pub mod telemetry;

use indexmap::IndexMap;
use serde::Deserialize;

pub use provider::*;
pub use server::*;
pub use storage::*;
pub use telemetry::{ExportProtocol, ExporterConfig, TelemetryConfig};

/// Top-level Foundry configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Artifact storage layout
    #[serde(default)]
    pub storage: StorageConfig,
    /// Generation providers keyed by provider id
    #[serde(default)]
    pub providers: IndexMap<String, ProviderConfig>,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let raw = r#"
            [server]
            listen_address = "127.0.0.1:4000"

            [storage]
            project_root = "/srv/foundry"

            [providers.gemini]
            type = "gemini"
            default_model = "gemini-2.5-flash-image"

            [providers.text3d]
            type = "tripo"
            api_key = "tsk_test"
            base_url = "http://localhost:9000"

            [providers.text3d.poll]
            interval_ms = 0
            max_attempts = 3

            [telemetry]
            service_name = "foundry-test"
        "#;

        let config: Config = toml::from_str(raw).unwrap();

        assert_eq!(config.server.listen_address.unwrap().port(), 4000);
        assert_eq!(config.storage.project_root.to_str(), Some("/srv/foundry"));
        assert_eq!(config.storage.upload_root, "uploads");

        let ids: Vec<&str> = config.providers.keys().map(String::as_str).collect();
        assert_eq!(ids, ["gemini", "text3d"]);

        let tripo = &config.providers["text3d"];
        assert!(matches!(tripo.provider_type, ProviderType::Tripo));
        assert!(tripo.api_key.is_some());
        let poll = tripo.poll.as_ref().unwrap();
        assert_eq!(poll.interval_ms, Some(0));
        assert_eq!(poll.max_attempts, Some(3));

        assert_eq!(config.telemetry.unwrap().service_name, "foundry-test");
    }

    #[test]
    fn image_service_type_names() {
        let raw = r#"
            [providers.wanx]
            type = "dashscope"

            [providers.seedream]
            type = "doubao"

            [providers.local]
            type = "z_image"
            base_url = "http://gpu-box:6006"
        "#;

        let config: Config = toml::from_str(raw).unwrap();

        assert_eq!(config.providers["wanx"].provider_type, ProviderType::Dashscope);
        assert_eq!(config.providers["seedream"].provider_type, ProviderType::Doubao);
        assert_eq!(config.providers["local"].provider_type, ProviderType::ZImage);
        assert_eq!(ProviderType::ZImage.to_string(), "z_image");
    }

    #[test]
    fn rejects_unknown_provider_type() {
        let raw = r#"
            [providers.mystery]
            type = "stable_diffusion"
        "#;

        let err = toml::from_str::<Config>(raw).unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let raw = r#"
            [providers.meshy]
            type = "meshy"
            api_token = "oops"
        "#;

        assert!(toml::from_str::<Config>(raw).is_err());
    }
}
