use std::time::Duration;

use async_trait::async_trait;
use foundry_config::ProviderType;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{
    Driver, DriverSettings, InputRequirement, OutputKind, Phase, download, error_code, error_message, object,
    parse_config, read_json, require_credential, send,
};
use crate::error::{GenerationError, Result};
use crate::http_client::{SHORT_TIMEOUT, http_client};
use crate::poller::{PollPolicy, Poller, StatusBucket, StatusProbe, StatusReport};
use crate::types::{Artifact, ImageInput};

const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com";
const DEFAULT_MODEL: &str = "wanx-v1";
const DEFAULT_POLICY: PollPolicy = PollPolicy::new(Duration::from_secs(1), 60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct WanxConfig {
    #[serde(default = "default_style")]
    style: String,
    /// `<width>*<height>`
    #[serde(default = "default_size")]
    size: String,
}

fn default_style() -> String {
    "<auto>".to_string()
}

fn default_size() -> String {
    "1024*1024".to_string()
}

impl WanxConfig {
    fn payload(&self, model: &str, prompt: &str) -> Value {
        json!({
            "model": model,
            "input": { "prompt": prompt },
            "parameters": {
                "style": self.style,
                "size": self.size,
                "n": 1,
            },
        })
    }
}

/// DashScope Wanx text to image, submitted as an asynchronous task
pub(crate) struct DashscopeDriver {
    name: String,
    client: Client,
    base_url: String,
    default_model: Option<String>,
    poller: Poller,
}

struct DashscopeStatus<'a> {
    name: &'a str,
    client: &'a Client,
    base_url: &'a str,
    api_key: &'a SecretString,
}

#[async_trait]
impl<'a> StatusProbe for DashscopeStatus<'a> {
    type Payload = Value;

    async fn check(&self, task_id: &str) -> Result<StatusReport<Value>> {
        let request = self
            .client
            .get(format!("{}/api/v1/tasks/{task_id}", self.base_url))
            .timeout(SHORT_TIMEOUT)
            .bearer_auth(self.api_key.expose_secret());

        let response = send(self.name, Phase::Status { task_id }, request).await?;
        let body = read_json(self.name, Phase::Status { task_id }, response).await?;

        Ok(StatusReport::new(classify(&body), body))
    }
}

/// Map a task query onto the poll buckets; the payload is the task `output`
fn classify(body: &Value) -> StatusBucket<Value> {
    let output = body.get("output").cloned().unwrap_or(Value::Null);
    let status = output.get("task_status").and_then(Value::as_str).unwrap_or_default();

    match status {
        "SUCCEEDED" => StatusBucket::Succeeded(output),
        "FAILED" => StatusBucket::Failed {
            message: error_message(&output).unwrap_or_else(|| "Wanx task failed".to_string()),
            provider_code: error_code(&output),
        },
        "CANCELED" | "UNKNOWN" => StatusBucket::Expired(status.to_string()),
        _ => StatusBucket::Pending,
    }
}

/// First result URL of a finished task
fn result_url(output: &Value) -> Option<&str> {
    output
        .get("results")
        .and_then(Value::as_array)
        .and_then(|results| results.iter().find_map(|r| r.get("url").and_then(Value::as_str)))
        .filter(|url| !url.is_empty())
}

impl DashscopeDriver {
    pub(crate) fn new(settings: &DriverSettings) -> Self {
        Self {
            name: settings.name.clone(),
            client: http_client(),
            base_url: settings.base_url_or(DEFAULT_BASE_URL),
            default_model: settings.default_model.clone(),
            poller: settings.poller(DEFAULT_POLICY),
        }
    }

    async fn submit(&self, api_key: &SecretString, payload: &Value) -> Result<String> {
        let request = self
            .client
            .post(format!("{}/api/v1/services/aigc/text2image/image-synthesis", self.base_url))
            .timeout(SHORT_TIMEOUT)
            .bearer_auth(api_key.expose_secret())
            .header("X-DashScope-Async", "enable")
            .json(payload);

        let response = send(&self.name, Phase::Submit, request).await?;
        let body = read_json(&self.name, Phase::Submit, response).await?;

        // Errors can arrive in a 200 response carrying `code`
        if body.get("code").is_some_and(|code| !code.is_null()) {
            return Err(GenerationError::ProviderSubmitFailed {
                message: error_message(&body).unwrap_or_else(|| "Wanx submission failed".to_string()),
                status: None,
                provider_code: error_code(&body),
            });
        }

        body.pointer("/output/task_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GenerationError::ProviderSubmitFailed {
                message: "DashScope returned no task id".to_string(),
                status: None,
                provider_code: None,
            })
    }
}

#[async_trait]
impl Driver for DashscopeDriver {
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
        let config: WanxConfig = parse_config(config)?;

        let model = model.or(self.default_model.as_deref()).unwrap_or(DEFAULT_MODEL);
        if !model.to_ascii_lowercase().contains("wanx") {
            return Err(GenerationError::InvalidConfig(format!(
                "model '{model}' is not supported; only Wanx models generate images"
            )));
        }

        if !images.is_empty() {
            tracing::debug!(provider = %self.name, images = images.len(), "Wanx text to image ignores input images");
        }

        let prompt = prompt.unwrap_or_default().trim();
        let task_id = self.submit(api_key, &config.payload(model, prompt)).await?;

        tracing::info!(provider = %self.name, task_id = %task_id, model = %model, "Wanx task submitted");

        let probe = DashscopeStatus {
            name: &self.name,
            client: &self.client,
            base_url: &self.base_url,
            api_key,
        };
        let completed = self.poller.run(&probe, task_id.clone()).await?;

        let url = result_url(&completed.payload).ok_or_else(|| {
            GenerationError::ProviderNoOutput(format!("Wanx task {task_id} finished without a result URL"))
        })?;

        let (bytes, content_type) = download(&self.client, &self.poller, &self.name, url, None).await?;

        let meta = object(json!({
            "service": "DashScope",
            "taskId": task_id,
            "taskType": "text_to_image",
            "model": model,
            "parameters": { "style": config.style, "size": config.size },
        }));

        Ok(Artifact {
            bytes,
            mime_type: content_type
                .filter(|ct| ct.starts_with("image/"))
                .unwrap_or_else(|| "image/png".to_string()),
            usage: None,
            meta,
            model_path: None,
        })
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Dashscope
    }

    fn output(&self) -> OutputKind {
        OutputKind::Image
    }
}
