use std::time::Instant;

use async_trait::async_trait;
use foundry_config::ProviderType;
use reqwest::Client;
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Driver, DriverSettings, InputRequirement, OutputKind, Phase, object, parse_config, send};
use crate::error::{GenerationError, Result};
use crate::http_client::{LONG_TIMEOUT, http_client};
use crate::types::{Artifact, ImageInput};

const DEFAULT_BASE_URL: &str = "http://localhost:6006";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ZImageConfig {
    #[serde(default = "default_side")]
    height: u32,
    #[serde(default = "default_side")]
    width: u32,
    #[serde(default = "default_steps", alias = "steps")]
    num_inference_steps: u32,
    #[serde(default = "default_guidance_scale")]
    guidance_scale: f64,
    #[serde(default = "default_seed")]
    seed: i64,
}

const fn default_side() -> u32 {
    1024
}

const fn default_steps() -> u32 {
    20
}

const fn default_guidance_scale() -> f64 {
    7.5
}

const fn default_seed() -> i64 {
    42
}

impl ZImageConfig {
    fn payload(&self, prompt: &str) -> Value {
        json!({
            "prompt": prompt,
            "height": self.height,
            "width": self.width,
            "num_inference_steps": self.num_inference_steps,
            "guidance_scale": self.guidance_scale,
            "seed": self.seed,
        })
    }

    fn parameters(&self) -> Value {
        json!({
            "height": self.height,
            "width": self.width,
            "numInferenceSteps": self.num_inference_steps,
            "guidanceScale": self.guidance_scale,
            "seed": self.seed,
        })
    }
}

/// Self-hosted Z-Image text to image service, answering with image bytes
pub(crate) struct ZImageDriver {
    name: String,
    client: Client,
    base_url: String,
}

impl ZImageDriver {
    pub(crate) fn new(settings: &DriverSettings) -> Self {
        Self {
            name: settings.name.clone(),
            client: http_client(),
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
        }
    }
}

#[async_trait]
impl Driver for ZImageDriver {
    async fn generate(
        &self,
        _credential: Option<&SecretString>,
        _model: Option<&str>,
        prompt: Option<&str>,
        images: &[ImageInput],
        config: &Map<String, Value>,
    ) -> Result<Artifact> {
        InputRequirement::Prompt.check(&self.name, prompt, images)?;
        let config: ZImageConfig = parse_config(config)?;

        let prompt = prompt.unwrap_or_default().trim();

        let request = self
            .client
            .post(format!("{}/generate", self.base_url))
            .timeout(LONG_TIMEOUT)
            .json(&config.payload(prompt));

        let started = Instant::now();
        let response = send(&self.name, Phase::Submit, request).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| value.starts_with("image/"));

        let bytes = response.bytes().await.map_err(|e| GenerationError::transport(&e))?;
        let generation_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if bytes.is_empty() {
            return Err(GenerationError::ProviderNoOutput("Z-Image returned an empty image".to_string()));
        }

        tracing::info!(provider = %self.name, size = bytes.len(), generation_ms, "Z-Image image generated");

        let meta = object(json!({
            "service": "Z-Image",
            "serviceUrl": self.base_url,
            "taskType": "text_to_image",
            "parameters": config.parameters(),
            "generationTime": generation_ms,
        }));

        Ok(Artifact {
            bytes,
            mime_type: content_type.unwrap_or_else(|| "image/png".to_string()),
            usage: None,
            meta,
            model_path: None,
        })
    }

    fn kind(&self) -> ProviderType {
        ProviderType::ZImage
    }

    fn output(&self) -> OutputKind {
        OutputKind::Image
    }
}
