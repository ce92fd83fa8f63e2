use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use foundry_config::ProviderType;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{
    Driver, DriverSettings, InputRequirement, OutputKind, Phase, describe_inputs, download, object, parse_config,
    read_json, require_credential, send,
};
use crate::error::{GenerationError, Result};
use crate::http_client::{LONG_TIMEOUT, http_client};
use crate::poller::{PollPolicy, Poller};
use crate::types::{Artifact, ImageInput, Usage};

const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com";
const DEFAULT_MODEL: &str = "doubao-seedream-4-5-251128";

/// Generation is synchronous; only the download retry settings apply
const DEFAULT_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(1), 1);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SeedreamConfig {
    /// `1K`, `2K`, `4K` or `<width>x<height>`
    #[serde(default = "default_size")]
    size: String,
    #[serde(default)]
    watermark: bool,
}

fn default_size() -> String {
    "2K".to_string()
}

impl SeedreamConfig {
    fn payload(&self, model: &str, prompt: &str, image: Option<&ImageInput>) -> Value {
        let mut payload = json!({
            "model": model,
            "prompt": prompt,
            "size": self.size,
            "watermark": self.watermark,
        });

        // Image editing takes the first image as a data URL
        if let Some(image) = image {
            let data = base64::engine::general_purpose::STANDARD.encode(&image.bytes);
            payload["image"] = json!(format!("data:{};base64,{data}", image.mime_type));
        }

        payload
    }
}

#[derive(Debug, Deserialize)]
struct GenerationsResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
    usage: Option<GenerationsUsage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerationsUsage {
    total_tokens: Option<u64>,
}

/// Volcengine Ark Doubao Seedream text and image to image
pub(crate) struct DoubaoDriver {
    name: String,
    client: Client,
    base_url: String,
    default_model: Option<String>,
    poller: Poller,
}

impl DoubaoDriver {
    pub(crate) fn new(settings: &DriverSettings) -> Self {
        Self {
            name: settings.name.clone(),
            client: http_client(),
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            default_model: settings.default_model.clone(),
            poller: settings.poller(DEFAULT_POLICY),
        }
    }
}

#[async_trait]
impl Driver for DoubaoDriver {
    async fn generate(
        &self,
        credential: Option<&SecretString>,
        model: Option<&str>,
        prompt: Option<&str>,
        images: &[ImageInput],
        config: &Map<String, Value>,
    ) -> Result<Artifact> {
        let api_key = require_credential(&self.name, self.kind(), credential)?;
        InputRequirement::Prompt.check(&self.name, prompt, images)?;
        let config: SeedreamConfig = parse_config(config)?;

        let prompt = prompt.unwrap_or_default().trim();
        let model = model.or(self.default_model.as_deref()).unwrap_or(DEFAULT_MODEL);
        let task_type = if images.is_empty() { "text_to_image" } else { "image_to_image" };

        tracing::debug!(provider = %self.name, model = %model, task_type, "sending Seedream request");

        let request = self
            .client
            .post(format!("{}/api/v3/images/generations", self.base_url))
            .timeout(LONG_TIMEOUT)
            .bearer_auth(api_key.expose_secret())
            .json(&config.payload(model, prompt, images.first()));

        let response = send(&self.name, Phase::Submit, request).await?;
        let body = read_json(&self.name, Phase::Submit, response).await?;

        let parsed: GenerationsResponse = serde_json::from_value(body)
            .map_err(|e| GenerationError::ProviderNoOutput(format!("unexpected response: {e}")))?;

        let url = parsed
            .data
            .into_iter()
            .find_map(|image| image.url.filter(|url| !url.is_empty()))
            .ok_or_else(|| GenerationError::ProviderNoOutput("Seedream returned no image URL".to_string()))?;

        let (bytes, content_type) = download(&self.client, &self.poller, &self.name, &url, None).await?;

        let mut meta = object(json!({
            "service": "Doubao",
            "taskType": task_type,
            "model": model,
            "parameters": { "size": config.size, "watermark": config.watermark },
        }));
        if !images.is_empty() {
            meta.insert("inputImages".into(), describe_inputs(&images[..1]));
        }

        Ok(Artifact {
            bytes,
            mime_type: content_type
                .filter(|ct| ct.starts_with("image/"))
                .unwrap_or_else(|| "image/jpeg".to_string()),
            usage: parsed.usage.and_then(|u| u.total_tokens).map(|total| Usage {
                credits_used: None,
                total_tokens: Some(total),
            }),
            meta,
            model_path: None,
        })
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Doubao
    }

    fn output(&self) -> OutputKind {
        OutputKind::Image
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::types::ImageSource;

    #[test]
    fn text_payload_has_no_image() {
        let config: SeedreamConfig = parse_config(&Map::new()).unwrap();
        let payload = config.payload(DEFAULT_MODEL, "a teapot", None);

        assert_eq!(payload["model"], DEFAULT_MODEL);
        assert_eq!(payload["size"], "2K");
        assert_eq!(payload["watermark"], false);
        assert!(payload.get("image").is_none());
    }

    #[test]
    fn first_image_becomes_a_data_url() {
        let config: SeedreamConfig = parse_config(&object(json!({"size": "4K", "watermark": true}))).unwrap();
        let image = ImageInput {
            source: ImageSource::Inline,
            bytes: Bytes::from_static(b"hi"),
            mime_type: "image/png".into(),
        };

        let payload = config.payload("seedream", "make it blue", Some(&image));

        assert_eq!(payload["image"], "data:image/png;base64,aGk=");
        assert_eq!(payload["size"], "4K");
        assert_eq!(payload["watermark"], true);
    }

    #[test]
    fn watermark_must_be_a_bool() {
        let result = parse_config::<SeedreamConfig>(&object(json!({"watermark": "yes"})));
        assert!(matches!(result, Err(GenerationError::InvalidConfig(_))));
    }
}
