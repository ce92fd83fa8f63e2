use std::time::{Duration, Instant};

use async_trait::async_trait;
use foundry_config::ProviderType;
use rand::Rng;
use reqwest::{Client, multipart};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{
    Driver, DriverSettings, InputRequirement, OutputKind, Phase, describe_inputs, download, error_message, object,
    parse_config, read_json, send,
};
use crate::error::{GenerationError, Result};
use crate::http_client::{LONG_TIMEOUT, SHORT_TIMEOUT, http_client};
use crate::poller::{PollPolicy, Poller, StatusBucket, StatusProbe, StatusReport};
use crate::types::{Artifact, ImageInput};

const DEFAULT_BASE_URL: &str = "http://localhost:6070";
const DEFAULT_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(5), 120);

/// Seed value that asks for a random seed
const RANDOM_SEED: i64 = -1;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct Ltx2Config {
    #[serde(default = "default_height")]
    height: u32,
    #[serde(default = "default_width")]
    width: u32,
    #[serde(default = "default_num_frames")]
    num_frames: u32,
    #[serde(default = "default_frame_rate")]
    frame_rate: f64,
    #[serde(default = "default_seed")]
    seed: i64,
    #[serde(default)]
    gpu_id: u32,
}

const fn default_height() -> u32 {
    512
}

const fn default_width() -> u32 {
    768
}

const fn default_num_frames() -> u32 {
    25
}

const fn default_frame_rate() -> f64 {
    25.0
}

const fn default_seed() -> i64 {
    42
}

impl Ltx2Config {
    /// Replace the random-seed sentinel with a concrete seed
    fn resolve_seed(&mut self) {
        if self.seed == RANDOM_SEED {
            self.seed = rand::rng().random_range(0..i64::from(i32::MAX));
        }
    }

    fn parameters(&self) -> Value {
        json!({
            "height": self.height,
            "width": self.width,
            "numFrames": self.num_frames,
            "frameRate": self.frame_rate,
            "seed": self.seed,
            "gpuId": self.gpu_id,
        })
    }

    fn text_payload(&self, prompt: &str) -> Value {
        json!({
            "prompt": prompt,
            "height": self.height,
            "width": self.width,
            "num_frames": self.num_frames,
            "frame_rate": self.frame_rate,
            "seed": self.seed,
            "gpu_id": self.gpu_id,
        })
    }

    fn image_form(&self, prompt: &str, image: &ImageInput) -> Result<multipart::Form> {
        let part = multipart::Part::bytes(image.bytes.to_vec())
            .file_name(format!("image.{}", image.upload_extension()))
            .mime_str(&image.mime_type)
            .map_err(|e| GenerationError::InvalidRequest(format!("invalid image MIME type: {e}")))?;

        Ok(multipart::Form::new()
            .text("prompt", prompt.to_string())
            .part("image", part)
            .text("height", self.height.to_string())
            .text("width", self.width.to_string())
            .text("num_frames", self.num_frames.to_string())
            .text("frame_rate", self.frame_rate.to_string())
            .text("seed", self.seed.to_string())
            .text("gpu_id", self.gpu_id.to_string()))
    }
}

/// Submission acknowledgement from the video service
#[derive(Debug, Deserialize)]
struct Submission {
    success: bool,
    task_id: Option<String>,
    video_url: Option<String>,
    video_path: Option<String>,
    duration: Option<f64>,
    message: Option<String>,
}

/// Self-hosted LTX-2 text and image to video service
pub(crate) struct Ltx2Driver {
    name: String,
    client: Client,
    base_url: String,
    poller: Poller,
}

/// Looks the task up in the service's video listing
struct Ltx2Status<'a> {
    name: &'a str,
    client: &'a Client,
    base_url: &'a str,
}

#[async_trait]
impl<'a> StatusProbe for Ltx2Status<'a> {
    /// Download path of the listed video, when the listing carries one
    type Payload = Option<String>;

    async fn check(&self, task_id: &str) -> Result<StatusReport<Option<String>>> {
        let request = self.client.get(format!("{}/list", self.base_url)).timeout(SHORT_TIMEOUT);

        let response = send(self.name, Phase::Status { task_id }, request).await?;
        let body = read_json(self.name, Phase::Status { task_id }, response).await?;

        Ok(StatusReport::new(classify(&body, task_id), body))
    }
}

fn classify(listing: &Value, task_id: &str) -> StatusBucket<Option<String>> {
    let entry = listing
        .get("videos")
        .and_then(Value::as_array)
        .and_then(|videos| {
            videos
                .iter()
                .find(|video| video.get("task_id").and_then(Value::as_str) == Some(task_id))
        });

    match entry {
        Some(video) => StatusBucket::Succeeded(video.get("download_url").and_then(Value::as_str).map(str::to_string)),
        None => StatusBucket::Pending,
    }
}

impl Ltx2Driver {
    pub(crate) fn new(settings: &DriverSettings) -> Self {
        Self {
            name: settings.name.clone(),
            client: http_client(),
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            poller: settings.poller(DEFAULT_POLICY),
        }
    }

    async fn submit(&self, prompt: &str, images: &[ImageInput], config: &Ltx2Config) -> Result<Submission> {
        // Rendering happens inside the submit call
        let request = match images.first() {
            None => self
                .client
                .post(format!("{}/generate/text2video", self.base_url))
                .json(&config.text_payload(prompt)),
            Some(image) => self
                .client
                .post(format!("{}/generate/image2video/upload", self.base_url))
                .multipart(config.image_form(prompt, image)?),
        }
        .timeout(LONG_TIMEOUT);

        let response = send(&self.name, Phase::Submit, request).await?;
        let body = read_json(&self.name, Phase::Submit, response).await?;

        let submission: Submission = serde_json::from_value(body.clone()).map_err(|e| {
            GenerationError::ProviderSubmitFailed {
                message: format!("unexpected response from video service: {e}"),
                status: None,
                provider_code: None,
            }
        })?;

        if !submission.success {
            return Err(GenerationError::ProviderSubmitFailed {
                message: submission
                    .message
                    .or_else(|| error_message(&body))
                    .unwrap_or_else(|| "video generation failed".to_string()),
                status: None,
                provider_code: None,
            });
        }

        Ok(submission)
    }
}

#[async_trait]
impl Driver for Ltx2Driver {
    async fn generate(
        &self,
        _credential: Option<&SecretString>,
        _model: Option<&str>,
        prompt: Option<&str>,
        images: &[ImageInput],
        config: &Map<String, Value>,
    ) -> Result<Artifact> {
        InputRequirement::PromptOrImage.check(&self.name, prompt, images)?;

        let mut config: Ltx2Config = parse_config(config)?;
        config.resolve_seed();

        let prompt = prompt.unwrap_or_default().trim();
        let task_type = if images.is_empty() { "text_to_video" } else { "image_to_video" };

        if images.len() > 1 {
            tracing::debug!(provider = %self.name, images = images.len(), "only the first image conditions the video");
        }

        let started = Instant::now();
        let submission = self.submit(prompt, images, &config).await?;

        let task_id = submission.task_id.clone().ok_or_else(|| GenerationError::ProviderSubmitFailed {
            message: "video service returned no task id".to_string(),
            status: None,
            provider_code: None,
        })?;

        tracing::info!(provider = %self.name, task_id = %task_id, task_type, "LTX-2 task accepted");

        // A successful submission that names its video is already rendered
        let path = match submission.video_url.clone().filter(|url| !url.is_empty()) {
            Some(path) => path,
            None => {
                let probe = Ltx2Status {
                    name: &self.name,
                    client: &self.client,
                    base_url: &self.base_url,
                };
                let completed = self.poller.run(&probe, task_id.clone()).await?;
                completed.payload.unwrap_or_else(|| format!("/download/{task_id}"))
            }
        };
        let url = format!("{}{path}", self.base_url);

        let (bytes, _) = download(&self.client, &self.poller, &self.name, &url, None).await?;

        let mut meta = object(json!({
            "service": "LTX-2",
            "serviceUrl": self.base_url,
            "taskId": task_id,
            "taskType": task_type,
            "parameters": config.parameters(),
            "generationTime": submission.duration.unwrap_or_else(|| started.elapsed().as_secs_f64()),
            "videoPath": submission.video_path,
        }));
        if !images.is_empty() {
            meta.insert("inputImages".into(), describe_inputs(&images[..1]));
        }

        Ok(Artifact {
            bytes,
            mime_type: "video/mp4".to_string(),
            usage: None,
            meta,
            model_path: Some(format!("{task_id}.mp4")),
        })
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Ltx2
    }

    fn output(&self) -> OutputKind {
        OutputKind::Video
    }
}
