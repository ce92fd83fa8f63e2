use std::time::Instant;

use async_trait::async_trait;
use foundry_config::ProviderType;
use reqwest::{Client, multipart};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Driver, DriverSettings, InputRequirement, OutputKind, Phase, describe_inputs, object, parse_config, send};
use crate::error::{GenerationError, Result};
use crate::http_client::{LONG_TIMEOUT, http_client};
use crate::types::{Artifact, ImageInput};

const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TrellisConfig {
    simplify_faces: Option<u32>,
    decimation_target: Option<u32>,
    texture_size: Option<u32>,
    remesh: Option<bool>,
}

impl TrellisConfig {
    fn form(&self, image: &ImageInput) -> Result<multipart::Form> {
        let part = multipart::Part::bytes(image.bytes.to_vec())
            .file_name(format!("image.{}", image.upload_extension()))
            .mime_str(&image.mime_type)
            .map_err(|e| GenerationError::InvalidRequest(format!("invalid image MIME type: {e}")))?;

        let mut form = multipart::Form::new().part("image", part);

        if let Some(faces) = self.simplify_faces {
            form = form.text("simplify_faces", faces.to_string());
        }
        if let Some(target) = self.decimation_target {
            form = form.text("decimation_target", target.to_string());
        }
        if let Some(size) = self.texture_size {
            form = form.text("texture_size", size.to_string());
        }
        if let Some(remesh) = self.remesh {
            form = form.text("remesh", remesh.to_string());
        }

        Ok(form)
    }

    fn parameters(&self) -> Value {
        json!({
            "simplifyFaces": self.simplify_faces,
            "decimationTarget": self.decimation_target,
            "textureSize": self.texture_size,
            "remesh": self.remesh,
        })
    }
}

/// Self-hosted TRELLIS.2 image to 3D service, answering with GLB bytes
pub(crate) struct TrellisDriver {
    name: String,
    client: Client,
    base_url: String,
}

impl TrellisDriver {
    pub(crate) fn new(settings: &DriverSettings) -> Self {
        Self {
            name: settings.name.clone(),
            client: http_client(),
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
        }
    }
}

#[async_trait]
impl Driver for TrellisDriver {
    async fn generate(
        &self,
        _credential: Option<&SecretString>,
        _model: Option<&str>,
        _prompt: Option<&str>,
        images: &[ImageInput],
        config: &Map<String, Value>,
    ) -> Result<Artifact> {
        InputRequirement::Image.check(&self.name, None, images)?;
        let config: TrellisConfig = parse_config(config)?;

        let image = &images[..1];
        let request = self
            .client
            .post(format!("{}/generate", self.base_url))
            .timeout(LONG_TIMEOUT)
            .multipart(config.form(&image[0])?);

        tracing::debug!(provider = %self.name, size = image[0].bytes.len(), "uploading image to TRELLIS.2");

        let started = Instant::now();
        let response = send(&self.name, Phase::Submit, request).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| !value.is_empty());

        let bytes = response.bytes().await.map_err(|e| GenerationError::transport(&e))?;
        let generation_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if bytes.is_empty() {
            return Err(GenerationError::ProviderNoOutput(
                "TRELLIS.2 returned an empty model".to_string(),
            ));
        }

        tracing::info!(provider = %self.name, size = bytes.len(), generation_ms, "TRELLIS.2 model generated");

        let meta = object(json!({
            "service": "TRELLIS.2",
            "serviceUrl": self.base_url,
            "taskType": "image_to_model",
            "inputImages": describe_inputs(image),
            "parameters": config.parameters(),
            "generationTime": generation_ms,
        }));

        Ok(Artifact {
            bytes,
            mime_type: content_type.unwrap_or_else(|| "model/gltf-binary".to_string()),
            usage: None,
            meta,
            model_path: Some("model.glb".to_string()),
        })
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Trellis
    }

    fn output(&self) -> OutputKind {
        OutputKind::Model
    }
}
