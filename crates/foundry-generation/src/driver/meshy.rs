use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use foundry_config::ProviderType;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{
    Driver, DriverSettings, InputRequirement, OutputKind, Phase, PipelineMode, download, model_mime, object,
    parse_config, read_json, require_credential, result_file_name, send, url_file_name,
};
use crate::error::{GenerationError, Result};
use crate::http_client::{SHORT_TIMEOUT, http_client};
use crate::poller::{PollPolicy, Poller, StatusBucket, StatusProbe, StatusReport};
use crate::types::{Artifact, ImageInput, Usage};

const DEFAULT_BASE_URL: &str = "https://api.meshy.ai";
const DEFAULT_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(10), 180);

/// Meshy task families and their API paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    TextTo3d,
    ImageTo3d,
    MultiImageTo3d,
}

impl Endpoint {
    const fn path(self) -> &'static str {
        match self {
            Self::TextTo3d => "/openapi/v2/text-to-3d",
            Self::ImageTo3d => "/openapi/v1/image-to-3d",
            Self::MultiImageTo3d => "/openapi/v1/multi-image-to-3d",
        }
    }

    const fn task_type(self) -> &'static str {
        match self {
            Self::TextTo3d => "text_to_model",
            Self::ImageTo3d => "image_to_model",
            Self::MultiImageTo3d => "multiview_to_model",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MeshyConfig {
    art_style: Option<String>,
    negative_prompt: Option<String>,
    seed: Option<i64>,
    ai_model: Option<String>,
    target_polycount: Option<u32>,
    /// `quad` or `triangle`
    topology: Option<String>,
    /// Refine only: `low`, `medium` or `high`
    texture_richness: Option<String>,
    enable_pbr: Option<bool>,
    should_remesh: Option<bool>,
    should_texture: Option<bool>,
    #[serde(default)]
    mode: PipelineMode,
    preview_task_id: Option<String>,
}

impl MeshyConfig {
    fn geometry_options(&self, payload: &mut Map<String, Value>) {
        if let Some(ref ai_model) = self.ai_model {
            payload.insert("ai_model".into(), json!(ai_model));
        }
        if let Some(polycount) = self.target_polycount {
            payload.insert("target_polycount".into(), json!(polycount));
        }
        if let Some(ref topology) = self.topology {
            payload.insert("topology".into(), json!(topology));
        }
    }

    fn preview_payload(&self, prompt: &str) -> Map<String, Value> {
        let mut payload = object(json!({ "mode": "preview", "prompt": prompt }));

        if let Some(ref style) = self.art_style {
            payload.insert("art_style".into(), json!(style));
        }
        if let Some(ref negative) = self.negative_prompt {
            payload.insert("negative_prompt".into(), json!(negative));
        }
        if let Some(seed) = self.seed {
            payload.insert("seed".into(), json!(seed));
        }
        self.geometry_options(&mut payload);

        payload
    }

    fn refine_payload(&self, preview_task_id: &str) -> Map<String, Value> {
        let mut payload = object(json!({ "mode": "refine", "preview_task_id": preview_task_id }));

        if let Some(ref richness) = self.texture_richness {
            payload.insert("texture_richness".into(), json!(richness));
        }
        if let Some(pbr) = self.enable_pbr {
            payload.insert("enable_pbr".into(), json!(pbr));
        }

        payload
    }

    fn image_payload(&self, images: &[ImageInput]) -> Map<String, Value> {
        let mut payload = if let [image] = images {
            let mut payload = object(json!({ "image_url": data_url(image) }));
            if let Some(pbr) = self.enable_pbr {
                payload.insert("enable_pbr".into(), json!(pbr));
            }
            if let Some(remesh) = self.should_remesh {
                payload.insert("should_remesh".into(), json!(remesh));
            }
            if let Some(texture) = self.should_texture {
                payload.insert("should_texture".into(), json!(texture));
            }
            payload
        } else {
            object(json!({ "image_urls": images.iter().map(data_url).collect::<Vec<_>>() }))
        };

        self.geometry_options(&mut payload);
        payload
    }

    fn parameters(&self) -> Value {
        json!({
            "artStyle": self.art_style,
            "negativePrompt": self.negative_prompt,
            "seed": self.seed,
            "aiModel": self.ai_model,
            "targetPolycount": self.target_polycount,
            "topology": self.topology,
            "textureRichness": self.texture_richness,
            "enablePbr": self.enable_pbr,
            "shouldRemesh": self.should_remesh,
            "shouldTexture": self.should_texture,
        })
    }
}

fn data_url(image: &ImageInput) -> String {
    format!(
        "data:{};base64,{}",
        image.mime_type,
        base64::engine::general_purpose::STANDARD.encode(&image.bytes)
    )
}

/// Meshy text, image and multi-image to 3D
pub(crate) struct MeshyDriver {
    name: String,
    client: Client,
    base_url: String,
    poller: Poller,
}

struct MeshyStatus<'a> {
    name: &'a str,
    client: &'a Client,
    base_url: &'a str,
    api_key: &'a SecretString,
    endpoint: Endpoint,
}

#[async_trait]
impl<'a> StatusProbe for MeshyStatus<'a> {
    type Payload = Value;

    async fn check(&self, task_id: &str) -> Result<StatusReport<Value>> {
        let request = self
            .client
            .get(format!("{}{}/{task_id}", self.base_url, self.endpoint.path()))
            .timeout(SHORT_TIMEOUT)
            .bearer_auth(self.api_key.expose_secret());

        let response = send(self.name, Phase::Status { task_id }, request).await?;
        let body = read_json(self.name, Phase::Status { task_id }, response).await?;

        Ok(StatusReport::new(classify(&body), body))
    }
}

fn classify(body: &Value) -> StatusBucket<Value> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or_default();

    match status {
        "SUCCEEDED" => StatusBucket::Succeeded(body.clone()),
        "FAILED" => StatusBucket::Failed {
            message: body
                .pointer("/task_error/message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .or_else(|| body.get("message").and_then(Value::as_str))
                .unwrap_or("3D generation failed")
                .to_string(),
            provider_code: None,
        },
        "EXPIRED" | "CANCELED" => StatusBucket::Expired(status.to_string()),
        _ => StatusBucket::Pending,
    }
}

/// GLB preferred, then FBX, then OBJ, then whatever is listed first
fn model_url(result: &Value) -> Option<String> {
    if let Some(urls) = result.get("model_urls").and_then(Value::as_object) {
        return ["glb", "fbx", "obj"]
            .iter()
            .find_map(|format| urls.get(*format).and_then(Value::as_str).filter(|u| !u.is_empty()))
            .or_else(|| urls.values().find_map(Value::as_str))
            .map(str::to_string);
    }

    result.get("model_url").and_then(Value::as_str).map(str::to_string)
}

impl MeshyDriver {
    pub(crate) fn new(settings: &DriverSettings) -> Self {
        Self {
            name: settings.name.clone(),
            client: http_client(),
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            poller: settings.poller(DEFAULT_POLICY),
        }
    }

    async fn run_task(&self, api_key: &SecretString, endpoint: Endpoint, payload: &Map<String, Value>) -> Result<(String, Value)> {
        let request = self
            .client
            .post(format!("{}{}", self.base_url, endpoint.path()))
            .timeout(SHORT_TIMEOUT)
            .bearer_auth(api_key.expose_secret())
            .json(payload);

        let response = send(&self.name, Phase::Submit, request).await?;
        let body = read_json(&self.name, Phase::Submit, response).await?;

        let task_id = body
            .get("result")
            .and_then(Value::as_str)
            .ok_or_else(|| GenerationError::ProviderSubmitFailed {
                message: format!("Meshy API returned no task id: {body}"),
                status: None,
                provider_code: None,
            })?
            .to_string();

        tracing::info!(provider = %self.name, task_id = %task_id, endpoint = endpoint.path(), "Meshy task created");

        let probe = MeshyStatus {
            name: &self.name,
            client: &self.client,
            base_url: &self.base_url,
            api_key,
            endpoint,
        };
        let completed = self.poller.run(&probe, task_id.clone()).await?;

        Ok((task_id, completed.payload))
    }
}

#[async_trait]
impl Driver for MeshyDriver {
    async fn generate(
        &self,
        credential: Option<&SecretString>,
        _model: Option<&str>,
        prompt: Option<&str>,
        images: &[ImageInput],
        config: &Map<String, Value>,
    ) -> Result<Artifact> {
        let api_key = require_credential(&self.name, self.kind(), credential)?;
        let config: MeshyConfig = parse_config(config)?;

        let mut preview_task_id = None;

        let (endpoint, task_id, result) = if images.is_empty() {
            match config.mode {
                PipelineMode::Refine => {
                    let preview = config.preview_task_id.as_deref().ok_or_else(|| {
                        GenerationError::InvalidConfig("mode 'refine' requires previewTaskId".to_string())
                    })?;
                    preview_task_id = Some(preview.to_string());

                    let (task_id, result) = self
                        .run_task(api_key, Endpoint::TextTo3d, &config.refine_payload(preview))
                        .await?;
                    (Endpoint::TextTo3d, task_id, result)
                }
                PipelineMode::Preview | PipelineMode::Full => {
                    InputRequirement::Prompt.check(&self.name, prompt, images)?;
                    let prompt = prompt.unwrap_or_default().trim();

                    let (preview, preview_result) = self
                        .run_task(api_key, Endpoint::TextTo3d, &config.preview_payload(prompt))
                        .await?;

                    if config.mode == PipelineMode::Full {
                        tracing::info!(provider = %self.name, task_id = %preview, "preview finished; submitting refine task");

                        let (task_id, result) = self
                            .run_task(api_key, Endpoint::TextTo3d, &config.refine_payload(&preview))
                            .await?;
                        preview_task_id = Some(preview);
                        (Endpoint::TextTo3d, task_id, result)
                    } else {
                        (Endpoint::TextTo3d, preview, preview_result)
                    }
                }
            }
        } else {
            if config.mode != PipelineMode::Preview {
                return Err(GenerationError::InvalidConfig(format!(
                    "mode '{}' is only supported for text-to-3D",
                    config.mode.as_str()
                )));
            }

            let endpoint = if images.len() > 1 {
                Endpoint::MultiImageTo3d
            } else {
                Endpoint::ImageTo3d
            };

            let (task_id, result) = self.run_task(api_key, endpoint, &config.image_payload(images)).await?;
            (endpoint, task_id, result)
        };

        let url = model_url(&result).ok_or_else(|| {
            GenerationError::ProviderNoOutput(format!("Meshy task {task_id} finished without a model URL"))
        })?;

        let (bytes, content_type) = download(&self.client, &self.poller, &self.name, &url, None).await?;

        let usage = result.get("credits").and_then(Value::as_f64).map(|credits| Usage {
            credits_used: Some(credits),
            total_tokens: None,
        });

        let meta = object(json!({
            "service": "Meshy",
            "taskId": task_id,
            "taskType": endpoint.task_type(),
            "mode": config.mode.as_str(),
            "previewTaskId": preview_task_id,
            "parameters": config.parameters(),
            "modelUrls": result.get("model_urls"),
            "textureUrls": result.get("texture_urls"),
            "thumbnailUrl": result.get("thumbnail_url"),
        }));

        Ok(Artifact {
            bytes,
            mime_type: model_mime(url_file_name(&url).unwrap_or_default(), content_type),
            usage,
            meta,
            model_path: Some(result_file_name(&task_id, &url)),
        })
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Meshy
    }

    fn output(&self) -> OutputKind {
        OutputKind::Model
    }
}
