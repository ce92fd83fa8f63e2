use std::fmt;

use secrecy::SecretString;
use serde::Deserialize;

/// Configuration for a single generation provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Driver implementing the provider protocol
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// API key; when absent the recognized environment variables are consulted
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Environment variable names to try instead of the driver defaults
    #[serde(default)]
    pub api_key_env: Vec<String>,
    /// Base URL override (required for self-hosted services)
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model used when the request does not name one
    #[serde(default)]
    pub default_model: Option<String>,
    /// Poll loop overrides for asynchronous providers
    #[serde(default)]
    pub poll: Option<PollConfig>,
}

/// Poll loop overrides; unset fields fall back to the driver's constants
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollConfig {
    /// Delay between status requests in milliseconds
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// Maximum number of status requests before giving up
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Retries for transport errors on a single status or download request
    #[serde(default)]
    pub transient_retries: Option<u32>,
    /// Initial backoff for transport retries in milliseconds
    #[serde(default)]
    pub backoff_ms: Option<u64>,
}

/// Supported provider drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Google Gemini image generation (synchronous)
    Gemini,
    /// Tripo3D text/image/multiview to 3D
    Tripo,
    /// Meshy text/image/multi-image to 3D
    Meshy,
    /// Hyper3D Rodin text/image to 3D
    Hyper3d,
    /// Self-hosted LTX-2 text/image to video
    Ltx2,
    /// Self-hosted TRELLIS.2 image to 3D (synchronous)
    Trellis,
    /// Alibaba DashScope Wanx text to image
    Dashscope,
    /// Volcengine Doubao Seedream text/image to image (synchronous)
    Doubao,
    /// Self-hosted Z-Image text to image (synchronous)
    ZImage,
}

impl ProviderType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Tripo => "tripo",
            Self::Meshy => "meshy",
            Self::Hyper3d => "hyper3d",
            Self::Ltx2 => "ltx2",
            Self::Trellis => "trellis",
            Self::Dashscope => "dashscope",
            Self::Doubao => "doubao",
            Self::ZImage => "z_image",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
