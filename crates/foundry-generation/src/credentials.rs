use std::collections::HashMap;

use foundry_config::{ProviderConfig, ProviderType};
use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};

/// Environment variables consulted for a driver, primary name first
pub fn recognized_env_vars(provider_type: ProviderType) -> &'static [&'static str] {
    match provider_type {
        ProviderType::Gemini => &["GOOGLE_API_KEY", "GENAI_API_KEY", "API_KEY"],
        ProviderType::Tripo => &["TRIPO_API_KEY"],
        ProviderType::Meshy => &["MESHY_API_KEY"],
        ProviderType::Hyper3d => &["HYPER3D_API_KEY", "RODIN_API_KEY"],
        ProviderType::Dashscope => &["DASHSCOPE_API_KEY"],
        ProviderType::Doubao => &["ARK_API_KEY"],
        ProviderType::Ltx2 | ProviderType::Trellis | ProviderType::ZImage => &[],
    }
}

/// Whether the driver talks to a service that needs a key
pub const fn requires_key(provider_type: ProviderType) -> bool {
    !matches!(provider_type, ProviderType::Ltx2 | ProviderType::Trellis | ProviderType::ZImage)
}

/// API keys resolved once at startup, keyed by provider id
#[derive(Default)]
pub struct Credentials {
    keys: HashMap<String, SecretString>,
}

impl Credentials {
    /// Resolve keys from the process environment
    pub fn from_env(providers: &IndexMap<String, ProviderConfig>) -> Self {
        Self::resolve(providers, |name| std::env::var(name).ok())
    }

    /// Resolve keys using `lookup` for environment variables
    ///
    /// An explicit `api_key` wins; otherwise `api_key_env` names are tried,
    /// falling back to the driver's recognized names. Blank values are ignored.
    pub fn resolve(providers: &IndexMap<String, ProviderConfig>, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut keys = HashMap::new();

        for (id, provider) in providers {
            if !requires_key(provider.provider_type) {
                continue;
            }

            let explicit = provider
                .api_key
                .as_ref()
                .filter(|key| !key.expose_secret().trim().is_empty())
                .cloned();

            let resolved = explicit.or_else(|| {
                env_names(provider)
                    .into_iter()
                    .find_map(|name| lookup(name).filter(|value| !value.trim().is_empty()))
                    .map(SecretString::from)
            });

            match resolved {
                Some(key) => {
                    tracing::debug!(provider = %id, key = %mask_secret(key.expose_secret()), "resolved API key");
                    keys.insert(id.clone(), key);
                }
                None => {
                    tracing::warn!(provider = %id, "no API key available; requests to this provider will fail");
                }
            }
        }

        Self { keys }
    }

    pub fn get(&self, provider_id: &str) -> Option<&SecretString> {
        self.keys.get(provider_id)
    }

    pub fn insert(&mut self, provider_id: impl Into<String>, key: SecretString) {
        self.keys.insert(provider_id.into(), key);
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("providers", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Names to try for a provider: configured overrides, or the driver defaults
pub fn env_names(provider: &ProviderConfig) -> Vec<&str> {
    if provider.api_key_env.is_empty() {
        recognized_env_vars(provider.provider_type).to_vec()
    } else {
        provider.api_key_env.iter().map(String::as_str).collect()
    }
}

/// Show only the first and last four characters of a secret
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();

    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
