use std::time::Duration;

use async_trait::async_trait;
use foundry_config::ProviderType;
use reqwest::{Client, multipart};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{
    Driver, DriverSettings, InputRequirement, OutputKind, Phase, download, model_mime, object, parse_config,
    read_json, require_credential, send,
};
use crate::error::{GenerationError, Result};
use crate::http_client::{SHORT_TIMEOUT, http_client};
use crate::poller::{PollPolicy, Poller, StatusBucket, StatusProbe, StatusReport};
use crate::retry::with_transient_retries;
use crate::types::{Artifact, ImageInput};

const DEFAULT_BASE_URL: &str = "https://api.hyper3d.com";
const DEFAULT_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(5), 180);

const DEFAULT_TIER: &str = "Gen-2";
const DEFAULT_MESH_MODE: &str = "Raw";
const DEFAULT_MATERIAL: &str = "PBR";
const DEFAULT_QUALITY_OVERRIDE: u32 = 500_000;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Hyper3dConfig {
    tier: Option<String>,
    /// `Raw` or `Quad`
    mesh_mode: Option<String>,
    /// Target face count
    quality_override: Option<u32>,
    /// `PBR` or `Unlit`
    material: Option<String>,
    /// Gen-2 multi-image fusion, `concat` or `fuse`
    condition_mode: Option<String>,
    geometry_condition: Option<String>,
}

impl Hyper3dConfig {
    fn tier(&self) -> &str {
        self.tier.as_deref().unwrap_or(DEFAULT_TIER)
    }

    fn mesh_mode(&self) -> &str {
        self.mesh_mode.as_deref().unwrap_or(DEFAULT_MESH_MODE)
    }

    fn material(&self) -> &str {
        self.material.as_deref().unwrap_or(DEFAULT_MATERIAL)
    }

    fn quality_override(&self) -> u32 {
        self.quality_override.unwrap_or(DEFAULT_QUALITY_OVERRIDE)
    }

    fn form(&self, prompt: Option<&str>, images: &[ImageInput]) -> Result<multipart::Form> {
        let mut form = multipart::Form::new()
            .text("tier", self.tier().to_string())
            .text("mesh_mode", self.mesh_mode().to_string())
            .text("quality_override", self.quality_override().to_string())
            .text("material", self.material().to_string());

        if let Some(ref mode) = self.condition_mode {
            form = form.text("condition_mode", mode.clone());
        }
        if let Some(ref condition) = self.geometry_condition {
            form = form.text("geometry_condition", condition.clone());
        }
        if let Some(prompt) = prompt.map(str::trim).filter(|p| !p.is_empty()) {
            form = form.text("prompt", prompt.to_string());
        }

        for (index, image) in images.iter().enumerate() {
            let part = multipart::Part::bytes(image.bytes.to_vec())
                .file_name(format!("image_{index}.{}", image.upload_extension()))
                .mime_str(&image.mime_type)
                .map_err(|e| GenerationError::InvalidRequest(format!("invalid image MIME type: {e}")))?;
            form = form.part("images", part);
        }

        Ok(form)
    }
}

/// Hyper3D Rodin text and image to 3D
pub(crate) struct Hyper3dDriver {
    name: String,
    client: Client,
    base_url: String,
    poller: Poller,
}

/// Polls every job under one subscription key
struct Hyper3dStatus<'a> {
    name: &'a str,
    client: &'a Client,
    base_url: &'a str,
    api_key: &'a SecretString,
    subscription_key: &'a str,
}

#[async_trait]
impl<'a> StatusProbe for Hyper3dStatus<'a> {
    type Payload = Vec<Value>;

    async fn check(&self, task_id: &str) -> Result<StatusReport<Vec<Value>>> {
        let request = self
            .client
            .post(format!("{}/api/v2/status", self.base_url))
            .timeout(SHORT_TIMEOUT)
            .bearer_auth(self.api_key.expose_secret())
            .json(&json!({ "subscription_key": self.subscription_key }));

        let response = send(self.name, Phase::Status { task_id }, request).await?;
        let body = read_json(self.name, Phase::Status { task_id }, response).await?;

        Ok(StatusReport::new(classify(&body), body))
    }
}

fn classify(body: &Value) -> StatusBucket<Vec<Value>> {
    let jobs = body.get("jobs").and_then(Value::as_array).cloned().unwrap_or_default();

    let status = |job: &Value| job.get("status").and_then(Value::as_str).unwrap_or_default().to_string();

    if jobs.is_empty() || !jobs.iter().all(|job| matches!(status(job).as_str(), "Done" | "Failed")) {
        return StatusBucket::Pending;
    }

    if let Some(failed) = jobs.iter().find(|job| status(job) == "Failed") {
        return StatusBucket::Failed {
            message: ["message", "error"]
                .iter()
                .find_map(|key| failed.get(*key).and_then(Value::as_str))
                .unwrap_or("Rodin job failed")
                .to_string(),
            provider_code: None,
        };
    }

    StatusBucket::Succeeded(jobs)
}

/// A downloadable result file
#[derive(Debug, Clone, Deserialize)]
struct ResultFile {
    name: String,
    url: String,
}

/// GLB first, then any other mesh format, then whatever came first
fn pick_file(files: &[ResultFile]) -> Option<&ResultFile> {
    files
        .iter()
        .find(|f| f.name.ends_with(".glb"))
        .or_else(|| {
            files
                .iter()
                .find(|f| [".fbx", ".obj", ".usdz"].iter().any(|ext| f.name.ends_with(ext)))
        })
        .or_else(|| files.first())
}

impl Hyper3dDriver {
    pub(crate) fn new(settings: &DriverSettings) -> Self {
        Self {
            name: settings.name.clone(),
            client: http_client(),
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            poller: settings.poller(DEFAULT_POLICY),
        }
    }

    /// Returns the task uuid and the subscription key used for status checks
    async fn submit(&self, api_key: &SecretString, form: multipart::Form) -> Result<(String, String)> {
        let request = self
            .client
            .post(format!("{}/api/v2/rodin", self.base_url))
            .timeout(SHORT_TIMEOUT)
            .bearer_auth(api_key.expose_secret())
            .multipart(form);

        let response = send(&self.name, Phase::Submit, request).await?;
        let body = read_json(&self.name, Phase::Submit, response).await?;

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Err(GenerationError::ProviderSubmitFailed {
                message: error.to_string(),
                status: None,
                provider_code: None,
            });
        }

        let uuid = body.get("uuid").and_then(Value::as_str);
        let subscription_key = body.pointer("/jobs/subscription_key").and_then(Value::as_str);

        match (uuid, subscription_key) {
            (Some(uuid), Some(key)) => Ok((uuid.to_string(), key.to_string())),
            _ => Err(GenerationError::ProviderSubmitFailed {
                message: format!("Rodin API returned no uuid or subscription key: {body}"),
                status: None,
                provider_code: None,
            }),
        }
    }

    /// List the finished task's files, retrying transient failures
    async fn result_files(&self, api_key: &SecretString, task_uuid: &str) -> Result<Vec<ResultFile>> {
        let policy = self.poller.policy();
        let phase = Phase::Status { task_id: task_uuid };

        let body = with_transient_retries(&self.name, policy.transient_retries, policy.backoff, || async {
            let request = self
                .client
                .post(format!("{}/api/v2/download", self.base_url))
                .timeout(SHORT_TIMEOUT)
                .bearer_auth(api_key.expose_secret())
                .json(&json!({ "task_uuid": task_uuid }));

            let response = send(&self.name, phase, request).await?;
            read_json(&self.name, phase, response).await
        })
        .await?;

        let files = body.get("list").cloned().unwrap_or_else(|| json!([]));
        serde_json::from_value(files).map_err(|e| GenerationError::ProviderDownloadFailed {
            status: None,
            message: format!("unexpected download list: {e}"),
        })
    }
}

#[async_trait]
impl Driver for Hyper3dDriver {
    async fn generate(
        &self,
        credential: Option<&SecretString>,
        _model: Option<&str>,
        prompt: Option<&str>,
        images: &[ImageInput],
        config: &Map<String, Value>,
    ) -> Result<Artifact> {
        let api_key = require_credential(&self.name, self.kind(), credential)?;
        InputRequirement::PromptOrImage.check(&self.name, prompt, images)?;

        let config: Hyper3dConfig = parse_config(config)?;
        let task_type = if images.is_empty() { "text_to_model" } else { "image_to_model" };

        tracing::debug!(
            provider = %self.name,
            task_type,
            tier = config.tier(),
            mesh_mode = config.mesh_mode(),
            quality = config.quality_override(),
            material = config.material(),
            "submitting Rodin task"
        );

        let (task_uuid, subscription_key) = self.submit(api_key, config.form(prompt, images)?).await?;

        tracing::info!(provider = %self.name, task_id = %task_uuid, "Rodin task created");

        let probe = Hyper3dStatus {
            name: &self.name,
            client: &self.client,
            base_url: &self.base_url,
            api_key,
            subscription_key: &subscription_key,
        };
        let completed = self.poller.run(&probe, task_uuid.clone()).await?;

        tracing::debug!(provider = %self.name, jobs = completed.payload.len(), "Rodin jobs finished");

        let files = self.result_files(api_key, &task_uuid).await?;
        let target = pick_file(&files).ok_or_else(|| {
            GenerationError::ProviderNoOutput(format!("Rodin task {task_uuid} returned no downloadable files"))
        })?;

        let (bytes, content_type) = download(&self.client, &self.poller, &self.name, &target.url, None).await?;

        let meta = object(json!({
            "service": "Hyper3D Rodin",
            "taskId": task_uuid,
            "taskUuid": task_uuid,
            "taskType": task_type,
            "tier": config.tier(),
            "meshMode": config.mesh_mode(),
            "material": config.material(),
            "qualityOverride": config.quality_override(),
            "downloadedFile": target.name,
            "allFiles": files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
        }));

        Ok(Artifact {
            bytes,
            mime_type: model_mime(&target.name, content_type),
            usage: None,
            meta,
            model_path: Some(target.name.clone()),
        })
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Hyper3d
    }

    fn output(&self) -> OutputKind {
        OutputKind::Model
    }
}
