pub(crate) mod dashscope;
pub(crate) mod doubao;
pub(crate) mod gemini;
pub(crate) mod hyper3d;
pub(crate) mod ltx2;
pub(crate) mod meshy;
pub(crate) mod trellis;
pub(crate) mod tripo;
pub(crate) mod z_image;

use async_trait::async_trait;
use bytes::Bytes;
use foundry_config::{PollConfig, ProviderType};
use foundry_telemetry::GenerationMetrics;
use reqwest::{RequestBuilder, Response};
use secrecy::SecretString;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::credentials::recognized_env_vars;
use crate::error::{GenerationError, Result};
use crate::poller::{PollPolicy, Poller};
use crate::retry::{should_retry_status, with_transient_retries};
use crate::store::ArtifactCategory;
use crate::types::{Artifact, ImageInput};

/// Longest provider error body echoed into an error message
const MAX_ERROR_BODY: usize = 500;

/// Kind of artifact a driver produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Image,
    Model,
    Video,
}

impl OutputKind {
    pub const fn category(self) -> ArtifactCategory {
        match self {
            Self::Image => ArtifactCategory::EvalImages,
            Self::Model => ArtifactCategory::Models,
            Self::Video => ArtifactCategory::Videos,
        }
    }
}

/// Uniform generation contract implemented once per provider protocol
#[async_trait]
pub(crate) trait Driver: Send + Sync {
    /// Validate inputs, run the provider job to completion, return its bytes
    async fn generate(
        &self,
        credential: Option<&SecretString>,
        model: Option<&str>,
        prompt: Option<&str>,
        images: &[ImageInput],
        config: &Map<String, Value>,
    ) -> Result<Artifact>;

    fn kind(&self) -> ProviderType;

    fn output(&self) -> OutputKind;
}

/// Per-provider construction settings taken from configuration
pub(crate) struct DriverSettings {
    pub name: String,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub poll: Option<PollConfig>,
    pub metrics: GenerationMetrics,
}

impl DriverSettings {
    pub(crate) fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }

    pub(crate) fn poller(&self, defaults: PollPolicy) -> Poller {
        Poller::new(
            &self.name,
            defaults.with_overrides(self.poll.as_ref()),
            self.metrics.clone(),
        )
    }
}

/// Which inputs a generation mode cannot do without
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputRequirement {
    Prompt,
    Image,
    PromptOrImage,
}

impl InputRequirement {
    pub(crate) fn check(self, provider: &str, prompt: Option<&str>, images: &[ImageInput]) -> Result<()> {
        let has_prompt = prompt.is_some_and(|p| !p.trim().is_empty());
        let has_image = !images.is_empty();

        match self {
            Self::Prompt if !has_prompt => Err(GenerationError::MissingPrompt(provider.to_string())),
            Self::Image if !has_image => Err(GenerationError::MissingImageInput(provider.to_string())),
            Self::PromptOrImage if !has_prompt && !has_image => {
                Err(GenerationError::MissingPrompt(provider.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Two-stage pipeline selection for drivers with draft and refined models
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum PipelineMode {
    /// Single draft task
    #[default]
    Preview,
    /// Refine an earlier preview task given by `previewTaskId`
    Refine,
    /// Preview to completion, then refine it
    Full,
}

impl PipelineMode {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Refine => "refine",
            Self::Full => "full",
        }
    }
}

/// Deserialize per-driver knobs, rejecting unknown or mistyped fields
pub(crate) fn parse_config<T: DeserializeOwned>(config: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(config.clone())).map_err(|e| GenerationError::InvalidConfig(e.to_string()))
}

pub(crate) fn require_credential<'a>(
    provider: &str,
    kind: ProviderType,
    credential: Option<&'a SecretString>,
) -> Result<&'a SecretString> {
    credential.ok_or_else(|| GenerationError::MissingApiKey {
        provider: provider.to_string(),
        env_hint: recognized_env_vars(kind).join(", "),
    })
}

/// Protocol phase of a provider call, used to classify failures
#[derive(Debug, Clone, Copy)]
pub(crate) enum Phase<'a> {
    Submit,
    Status { task_id: &'a str },
    Download,
}

/// Send a request and turn transport errors and non-success statuses into `GenerationError`
pub(crate) async fn send(provider: &str, phase: Phase<'_>, request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.map_err(|e| {
        tracing::error!(provider = %provider, phase = ?phase, error = %e, "provider request failed");
        GenerationError::transport(&e)
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());

    tracing::error!(provider = %provider, phase = ?phase, status = %status, "provider returned an error status");

    Err(error_for_status(provider, phase, status.as_u16(), &body))
}

/// Read a JSON body from a successful response
pub(crate) async fn read_json(provider: &str, phase: Phase<'_>, response: Response) -> Result<Value> {
    response.json::<Value>().await.map_err(|e| {
        tracing::error!(provider = %provider, phase = ?phase, error = %e, "failed to parse provider response");
        if e.is_decode() {
            undecodable(phase, &e)
        } else {
            GenerationError::transport(&e)
        }
    })
}

fn undecodable(phase: Phase<'_>, error: &reqwest::Error) -> GenerationError {
    let message = format!("unexpected response from provider: {error}");

    match phase {
        Phase::Submit => GenerationError::ProviderSubmitFailed {
            message,
            status: None,
            provider_code: None,
        },
        Phase::Status { task_id } => GenerationError::ProviderTaskFailed {
            task_id: task_id.to_string(),
            message,
            provider_code: None,
        },
        Phase::Download => GenerationError::ProviderDownloadFailed { status: None, message },
    }
}

/// Download result bytes, retrying transient failures
///
/// Returns the bytes and the response `content-type`, if any.
pub(crate) async fn download(
    client: &reqwest::Client,
    poller: &Poller,
    provider: &str,
    url: &str,
    bearer: Option<&str>,
) -> Result<(Bytes, Option<String>)> {
    let policy = poller.policy();

    with_transient_retries(provider, policy.transient_retries, policy.backoff, || async {
        let mut request = client.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = send(provider, Phase::Download, request).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());

        let bytes = response.bytes().await.map_err(|e| GenerationError::transport(&e))?;

        tracing::debug!(provider = %provider, size = bytes.len(), "downloaded result");
        Ok((bytes, content_type))
    })
    .await
}

fn error_for_status(provider: &str, phase: Phase<'_>, status: u16, body: &str) -> GenerationError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(error_message)
        .unwrap_or_else(|| truncate(body, MAX_ERROR_BODY));
    let provider_code = parsed.as_ref().and_then(error_code);

    // Result URLs are usually pre-signed and carry no key
    if matches!(status, 401 | 403) && !matches!(phase, Phase::Download) {
        return GenerationError::InvalidApiKey {
            provider: provider.to_string(),
            message: format!("{status}: {message}"),
        };
    }

    match phase {
        Phase::Submit => GenerationError::ProviderSubmitFailed {
            message: format!("{status}: {message}"),
            status: Some(status),
            provider_code,
        },
        Phase::Status { .. } if should_retry_status(status) => GenerationError::ProviderUnreachable {
            message: format!("status check returned {status}: {message}"),
            retryable: true,
        },
        Phase::Status { task_id } => GenerationError::ProviderTaskFailed {
            task_id: task_id.to_string(),
            message: format!("status check returned {status}: {message}"),
            provider_code,
        },
        Phase::Download => GenerationError::ProviderDownloadFailed {
            status: Some(status),
            message: format!("{status}: {message}"),
        },
    }
}

/// Human-readable message from a provider error body
pub(crate) fn error_message(body: &Value) -> Option<String> {
    ["message", "detail", "error"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .or_else(|| body.pointer("/error/message").and_then(Value::as_str))
        .map(str::to_string)
}

/// Provider-native error code, numeric or textual
pub(crate) fn error_code(body: &Value) -> Option<String> {
    body.get("code")
        .or_else(|| body.pointer("/error/code"))
        .and_then(|code| match code {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

/// Last path segment of a URL, ignoring any query or fragment
pub(crate) fn url_file_name(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let path = path.split_once("://").map_or(path, |(_, rest)| rest);

    path.split_once('/')
        .and_then(|(_, path)| path.rsplit('/').next())
        .filter(|name| !name.is_empty())
}

/// Lowercase extension of a file name, without the dot
pub(crate) fn file_extension(name: &str) -> Option<String> {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// MIME type of a model file, by extension when it has a known one
pub(crate) fn model_mime(file_name: &str, content_type: Option<String>) -> String {
    let mime = match file_extension(file_name).as_deref() {
        Some("glb") => "model/gltf-binary",
        Some("gltf") => "model/gltf+json",
        Some("fbx") => "application/octet-stream",
        Some("obj") => "text/plain",
        Some("usdz") => "model/vnd.usdz+zip",
        _ => return content_type.unwrap_or_else(|| "model/gltf-binary".to_string()),
    };
    mime.to_string()
}

/// `<task_id>.<ext>`, taking the extension from the result URL, `glb` when it has none
pub(crate) fn result_file_name(task_id: &str, url: &str) -> String {
    let ext = url_file_name(url)
        .and_then(file_extension)
        .unwrap_or_else(|| "glb".to_string());
    format!("{task_id}.{ext}")
}

/// Unwrap a `json!` object literal
pub(crate) fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Current local time as RFC 3339 with offset
pub(crate) fn local_timestamp() -> String {
    jiff::Zoned::now().strftime("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Upload metadata for the input images, as recorded in `meta`
pub(crate) fn describe_inputs(images: &[ImageInput]) -> Value {
    Value::Array(
        images
            .iter()
            .enumerate()
            .map(|(index, image)| {
                serde_json::json!({
                    "index": index,
                    "originalPath": image.source.reference(),
                    "mimeType": image.mime_type,
                    "size": image.bytes.len(),
                })
            })
            .collect(),
    )
}
