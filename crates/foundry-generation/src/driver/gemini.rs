use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use foundry_config::ProviderType;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::{Driver, DriverSettings, InputRequirement, OutputKind, Phase, parse_config, read_json, require_credential, send};
use crate::error::{GenerationError, Result};
use crate::http_client::{LONG_TIMEOUT, http_client};
use crate::types::{Artifact, ImageInput, Usage};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";

/// Optional Gemini knobs
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GeminiConfig {
    /// e.g. "1:1", "16:9"
    aspect_ratio: Option<String>,
    temperature: Option<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    generation_config: Value,
}

#[derive(Serialize)]
struct RequestContent {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart {
    InlineData {
        #[serde(rename = "mimeType")]
        mime_type: String,
        data: String,
    },
    Text(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

/// Both the camelCase and snake_case response shapes occur in the wild
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(alias = "inline_data")]
    inline_data: Option<InlineBlob>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineBlob {
    #[serde(alias = "mime_type")]
    mime_type: Option<String>,
    data: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    total_token_count: Option<u64>,
}

/// Synchronous Gemini image generation
pub(crate) struct GeminiDriver {
    name: String,
    client: Client,
    base_url: String,
    default_model: Option<String>,
}

impl GeminiDriver {
    pub(crate) fn new(settings: &DriverSettings) -> Self {
        Self {
            name: settings.name.clone(),
            client: http_client(),
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            default_model: settings.default_model.clone(),
        }
    }

    fn build_request(prompt: &str, images: &[ImageInput], config: &GeminiConfig) -> GenerateContentRequest {
        let engine = base64::engine::general_purpose::STANDARD;

        let mut parts: Vec<RequestPart> = images
            .iter()
            .map(|image| RequestPart::InlineData {
                mime_type: image.mime_type.clone(),
                data: engine.encode(&image.bytes),
            })
            .collect();
        parts.push(RequestPart::Text(prompt.to_string()));

        let mut generation_config = json!({ "responseModalities": ["IMAGE", "TEXT"] });
        if let Some(ref ratio) = config.aspect_ratio {
            generation_config["imageConfig"] = json!({ "aspectRatio": ratio });
        }
        if let Some(temperature) = config.temperature {
            generation_config["temperature"] = json!(temperature);
        }

        GenerateContentRequest {
            contents: vec![RequestContent { role: "user", parts }],
            generation_config,
        }
    }
}

#[async_trait]
impl Driver for GeminiDriver {
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
        let config: GeminiConfig = parse_config(config)?;

        let prompt = prompt.unwrap_or_default().trim();
        let model = model.or(self.default_model.as_deref()).unwrap_or(DEFAULT_MODEL);
        let url = format!("{}/v1beta/models/{model}:generateContent", self.base_url);

        tracing::debug!(provider = %self.name, model = %model, images = images.len(), "sending Gemini image request");

        let request = self
            .client
            .post(&url)
            .timeout(LONG_TIMEOUT)
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&Self::build_request(prompt, images, &config));

        let response = send(&self.name, Phase::Submit, request).await?;
        let body = read_json(&self.name, Phase::Submit, response).await?;

        let parsed: GenerateContentResponse =
            serde_json::from_value(body).map_err(|e| GenerationError::ProviderNoOutput(format!("unexpected response: {e}")))?;

        let usage = parsed
            .usage_metadata
            .and_then(|u| u.total_token_count)
            .map(|total| Usage {
                credits_used: None,
                total_tokens: Some(total),
            });

        let (mime_type, data) = parsed
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .filter_map(|part| part.inline_data)
            .find_map(|blob| blob.data.map(|data| (blob.mime_type, data)))
            .ok_or_else(|| GenerationError::ProviderNoOutput("response contained no image part".to_string()))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| GenerationError::ProviderNoOutput(format!("image part is not valid base64: {e}")))?;

        tracing::debug!(provider = %self.name, size = bytes.len(), "Gemini image generation complete");

        let mut meta = Map::new();
        meta.insert("service".into(), json!("Gemini"));
        meta.insert("taskType".into(), json!(if images.is_empty() { "text_to_image" } else { "image_to_image" }));
        meta.insert("model".into(), json!(model));

        Ok(Artifact {
            bytes: Bytes::from(bytes),
            mime_type: mime_type.unwrap_or_else(|| "image/png".to_string()),
            usage,
            meta,
            model_path: None,
        })
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Gemini
    }

    fn output(&self) -> OutputKind {
        OutputKind::Image
    }
}
