use std::time::Duration;

use async_trait::async_trait;
use foundry_config::ProviderType;
use reqwest::{Client, multipart};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{
    Driver, DriverSettings, InputRequirement, OutputKind, Phase, PipelineMode, download, error_code, error_message,
    model_mime, object, parse_config, read_json, require_credential, result_file_name, send, url_file_name,
};
use crate::error::{GenerationError, Result};
use crate::http_client::{SHORT_TIMEOUT, http_client};
use crate::poller::{PollPolicy, Poller, StatusBucket, StatusProbe, StatusReport};
use crate::types::{Artifact, ImageInput, Usage};

const DEFAULT_BASE_URL: &str = "https://api.tripo3d.ai";
const DEFAULT_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(10), 120);

/// Tripo knobs; `modelVersion = "default"` leaves the choice to the API
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct TripoConfig {
    model_version: Option<String>,
    face_limit: Option<u32>,
    texture: Option<bool>,
    pbr: Option<bool>,
    /// `auto`, `align_image` or `none`
    orientation: Option<String>,
    /// Text mode only
    style: Option<String>,
    /// Text mode only
    negative_prompt: Option<String>,
    #[serde(default)]
    mode: PipelineMode,
    preview_task_id: Option<String>,
}

impl TripoConfig {
    fn apply_options(&self, payload: &mut Map<String, Value>) {
        if let Some(version) = self.model_version.as_deref().filter(|v| *v != "default") {
            payload.insert("model_version".into(), json!(version));
        }
        if let Some(face_limit) = self.face_limit {
            payload.insert("face_limit".into(), json!(face_limit));
        }
        if let Some(texture) = self.texture {
            payload.insert("texture".into(), json!(texture));
        }
        if let Some(pbr) = self.pbr {
            payload.insert("pbr".into(), json!(pbr));
        }
        if let Some(ref orientation) = self.orientation {
            payload.insert("orientation".into(), json!(orientation));
        }

        if payload.get("type").and_then(Value::as_str) == Some("text_to_model") {
            if let Some(ref style) = self.style {
                payload.insert("style".into(), json!(style));
            }
            if let Some(ref negative) = self.negative_prompt {
                payload.insert("negative_prompt".into(), json!(negative));
            }
        }
    }

    fn parameters(&self) -> Value {
        json!({
            "modelVersion": self.model_version,
            "faceLimit": self.face_limit,
            "texture": self.texture,
            "pbr": self.pbr,
            "orientation": self.orientation,
            "style": self.style,
            "negativePrompt": self.negative_prompt,
        })
    }
}

/// Tripo3D text, image and multi-view to 3D
pub(crate) struct TripoDriver {
    name: String,
    client: Client,
    base_url: String,
    poller: Poller,
}

struct TripoStatus<'a> {
    name: &'a str,
    client: &'a Client,
    base_url: &'a str,
    api_key: &'a SecretString,
}

#[async_trait]
impl<'a> StatusProbe for TripoStatus<'a> {
    type Payload = Value;

    async fn check(&self, task_id: &str) -> Result<StatusReport<Value>> {
        let request = self
            .client
            .get(format!("{}/v2/openapi/task/{task_id}", self.base_url))
            .timeout(SHORT_TIMEOUT)
            .bearer_auth(self.api_key.expose_secret());

        let response = send(self.name, Phase::Status { task_id }, request).await?;
        let body = read_json(self.name, Phase::Status { task_id }, response).await?;

        Ok(StatusReport::new(classify(&body), body))
    }
}

/// Map a Tripo task response onto the poll buckets
fn classify(body: &Value) -> StatusBucket<Value> {
    if body.get("code").and_then(Value::as_i64).is_some_and(|code| code != 0) {
        return StatusBucket::Failed {
            message: error_message(body).unwrap_or_else(|| "Tripo API error".to_string()),
            provider_code: error_code(body),
        };
    }

    let data = body.get("data").cloned().unwrap_or(Value::Null);
    let status = data.get("status").and_then(Value::as_str).unwrap_or_default();

    match status {
        "success" => StatusBucket::Succeeded(data),
        "failed" => StatusBucket::Failed {
            message: data
                .get("error")
                .and_then(Value::as_str)
                .map_or_else(|| "3D generation failed".to_string(), str::to_string),
            provider_code: None,
        },
        "cancelled" | "banned" | "expired" => StatusBucket::Expired(status.to_string()),
        _ => StatusBucket::Pending,
    }
}

/// PBR model preferred over the base model; entries may be URLs or `{url}` objects
fn model_url(data: &Value) -> Option<String> {
    let output = data.get("output")?;

    ["pbr_model", "model", "base_model"].iter().find_map(|key| match output.get(key)? {
        Value::String(url) if !url.is_empty() => Some(url.clone()),
        Value::Object(entry) => entry.get("url").and_then(Value::as_str).map(str::to_string),
        _ => None,
    })
}

fn usage(data: &Value) -> Option<Usage> {
    let credits = data
        .get("consumed_credit")
        .or_else(|| data.get("running_left_credits"))
        .and_then(Value::as_f64)?;

    Some(Usage {
        credits_used: Some(credits),
        total_tokens: None,
    })
}

impl TripoDriver {
    pub(crate) fn new(settings: &DriverSettings) -> Self {
        Self {
            name: settings.name.clone(),
            client: http_client(),
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            poller: settings.poller(DEFAULT_POLICY),
        }
    }

    async fn upload(&self, api_key: &SecretString, image: &ImageInput) -> Result<String> {
        let part = multipart::Part::bytes(image.bytes.to_vec())
            .file_name(format!("image.{}", image.upload_extension()))
            .mime_str(&image.mime_type)
            .map_err(|e| GenerationError::InvalidRequest(format!("invalid image MIME type: {e}")))?;

        let request = self
            .client
            .post(format!("{}/v2/openapi/upload", self.base_url))
            .timeout(SHORT_TIMEOUT)
            .bearer_auth(api_key.expose_secret())
            .multipart(multipart::Form::new().part("file", part));

        let response = send(&self.name, Phase::Submit, request).await?;
        let body = read_json(&self.name, Phase::Submit, response).await?;
        ensure_ok(&body)?;

        body.pointer("/data/image_token")
            .or_else(|| body.pointer("/data/file_token"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GenerationError::ProviderSubmitFailed {
                message: "upload returned no file token".to_string(),
                status: None,
                provider_code: None,
            })
    }

    /// Build the draft task payload from the available inputs
    async fn draft_payload(&self, api_key: &SecretString, prompt: Option<&str>, images: &[ImageInput]) -> Result<Map<String, Value>> {
        let payload = match images {
            [] => json!({
                "type": "text_to_model",
                "prompt": prompt.unwrap_or_default().trim(),
            }),
            [image] => {
                let token = self.upload(api_key, image).await?;
                json!({
                    "type": "image_to_model",
                    "file": { "type": "image", "file_token": token },
                })
            }
            _ => {
                tracing::debug!(provider = %self.name, images = images.len(), "uploading images for multi-view mode");

                let mut files = Vec::with_capacity(images.len());
                for image in images {
                    let token = self.upload(api_key, image).await?;
                    files.push(json!({ "type": "image", "file_token": token }));
                }

                json!({ "type": "multiview_to_model", "files": files })
            }
        };

        Ok(object(payload))
    }

    /// Submit a task and poll it to success; returns the task id and final data
    async fn run_task(&self, api_key: &SecretString, payload: &Map<String, Value>) -> Result<(String, Value)> {
        tracing::debug!(
            provider = %self.name,
            task_type = payload.get("type").and_then(serde_json::Value::as_str).unwrap_or_default(),
            "creating Tripo task"
        );

        let request = self
            .client
            .post(format!("{}/v2/openapi/task", self.base_url))
            .timeout(SHORT_TIMEOUT)
            .bearer_auth(api_key.expose_secret())
            .json(payload);

        let response = send(&self.name, Phase::Submit, request).await?;
        let body = read_json(&self.name, Phase::Submit, response).await?;
        ensure_ok(&body)?;

        let task_id = body
            .pointer("/data/task_id")
            .and_then(Value::as_str)
            .ok_or_else(|| GenerationError::ProviderSubmitFailed {
                message: "Tripo API returned no task id".to_string(),
                status: None,
                provider_code: None,
            })?
            .to_string();

        tracing::info!(provider = %self.name, task_id = %task_id, "Tripo task created");

        let probe = TripoStatus {
            name: &self.name,
            client: &self.client,
            base_url: &self.base_url,
            api_key,
        };
        let completed = self.poller.run(&probe, task_id.clone()).await?;

        Ok((task_id, completed.payload))
    }
}

/// Tripo reports API errors as `code != 0` in a 200 response
fn ensure_ok(body: &Value) -> Result<()> {
    match body.get("code").and_then(Value::as_i64) {
        Some(0) | None => Ok(()),
        Some(_) => Err(GenerationError::ProviderSubmitFailed {
            message: error_message(body).unwrap_or_else(|| "Tripo API error".to_string()),
            status: None,
            provider_code: error_code(body),
        }),
    }
}

fn refine_payload(draft_task_id: &str) -> Map<String, Value> {
    object(json!({
        "type": "refine_model",
        "draft_model_task_id": draft_task_id,
    }))
}

#[async_trait]
impl Driver for TripoDriver {
    async fn generate(
        &self,
        credential: Option<&SecretString>,
        _model: Option<&str>,
        prompt: Option<&str>,
        images: &[ImageInput],
        config: &Map<String, Value>,
    ) -> Result<Artifact> {
        let api_key = require_credential(&self.name, self.kind(), credential)?;
        let config: TripoConfig = parse_config(config)?;

        let mut preview_task_id = None;

        let (payload, data_task) = match config.mode {
            PipelineMode::Refine => {
                let draft = config.preview_task_id.as_deref().ok_or_else(|| {
                    GenerationError::InvalidConfig("mode 'refine' requires previewTaskId".to_string())
                })?;
                preview_task_id = Some(draft.to_string());

                let payload = refine_payload(draft);
                let result = self.run_task(api_key, &payload).await?;
                (payload, result)
            }
            PipelineMode::Preview | PipelineMode::Full => {
                InputRequirement::PromptOrImage.check(&self.name, prompt, images)?;

                let mut payload = self.draft_payload(api_key, prompt, images).await?;
                config.apply_options(&mut payload);
                let draft = self.run_task(api_key, &payload).await?;

                if config.mode == PipelineMode::Full {
                    tracing::info!(provider = %self.name, task_id = %draft.0, "preview finished; submitting refine task");
                    preview_task_id = Some(draft.0.clone());

                    let payload = refine_payload(&draft.0);
                    let result = self.run_task(api_key, &payload).await?;
                    (payload, result)
                } else {
                    (payload, draft)
                }
            }
        };

        let (task_id, data) = data_task;
        let url = model_url(&data).ok_or_else(|| {
            GenerationError::ProviderNoOutput(format!("Tripo task {task_id} finished without a model URL"))
        })?;

        let (bytes, content_type) = download(&self.client, &self.poller, &self.name, &url, None).await?;

        // CDNs often answer with application/octet-stream
        let mime_type = model_mime(
            url_file_name(&url).unwrap_or_default(),
            content_type.filter(|ct| ct.starts_with("model/")),
        );

        let meta = object(json!({
            "service": "Tripo",
            "taskId": task_id,
            "taskType": payload.get("type"),
            "mode": config.mode.as_str(),
            "previewTaskId": preview_task_id,
            "parameters": config.parameters(),
            "modelUrl": url,
        }));

        Ok(Artifact {
            bytes,
            mime_type,
            usage: usage(&data),
            meta,
            model_path: Some(result_file_name(&task_id, &url)),
        })
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Tripo
    }

    fn output(&self) -> OutputKind {
        OutputKind::Model
    }
}
