use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GenerationError>;

/// Generation failures with a stable machine-readable code
#[derive(Debug, Error)]
pub enum GenerationError {
    /// No credential is available for a provider that needs one
    #[error("No API key configured for provider '{provider}'; set one of: {env_hint}")]
    MissingApiKey { provider: String, env_hint: String },

    /// The driver needs a text prompt and none was given
    #[error("Provider '{0}' requires a prompt")]
    MissingPrompt(String),

    /// The driver needs at least one image and none resolved
    #[error("Provider '{0}' requires at least one input image")]
    MissingImageInput(String),

    /// Per-driver configuration failed typed validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Malformed request body
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The provider id is not configured
    #[error("Unsupported provider '{0}'")]
    UnsupportedDriver(String),

    /// The provider rejected the key, or it was rejected recently
    #[error("API key rejected by provider '{provider}': {message}")]
    InvalidApiKey { provider: String, message: String },

    #[error("Provider rejected the submission: {message}")]
    ProviderSubmitFailed {
        message: String,
        status: Option<u16>,
        provider_code: Option<String>,
    },

    /// Provider message is passed through verbatim
    #[error("{message}")]
    ProviderTaskFailed {
        task_id: String,
        message: String,
        provider_code: Option<String>,
    },

    #[error("Provider task {task_id} ended with status '{status}'")]
    ProviderTaskExpired { task_id: String, status: String },

    #[error("Provider task {task_id} did not finish after {attempts} status checks")]
    ProviderTimeout { task_id: String, attempts: u32 },

    #[error("Provider returned no output: {0}")]
    ProviderNoOutput(String),

    /// Connect failure, timeout, or a 429/5xx status that exhausted its retries
    #[error("Provider unreachable: {message}")]
    ProviderUnreachable { message: String, retryable: bool },

    #[error("Result download failed: {message}")]
    ProviderDownloadFailed { status: Option<u16>, message: String },

    /// Artifact store I/O failure; details stay in the logs
    #[error("Failed to store artifact")]
    Storage(#[source] std::io::Error),
}

impl GenerationError {
    /// Stable error code reported to callers
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingApiKey { .. } => "missing_api_key",
            Self::MissingPrompt(_) => "missing_prompt",
            Self::MissingImageInput(_) => "missing_image_input",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnsupportedDriver(_) => "unsupported_driver",
            Self::InvalidApiKey { .. } => "invalid_api_key",
            Self::ProviderSubmitFailed { .. } => "provider_submit_failed",
            Self::ProviderTaskFailed { .. } => "provider_task_failed",
            Self::ProviderTaskExpired { .. } => "provider_task_expired",
            Self::ProviderTimeout { .. } => "provider_timeout",
            Self::ProviderNoOutput(_) => "provider_no_output",
            Self::ProviderUnreachable { .. } => "provider_unreachable",
            Self::ProviderDownloadFailed { .. } => "provider_download_failed",
            Self::Storage(_) => "storage_failed",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingPrompt(_) | Self::MissingImageInput(_) | Self::InvalidConfig(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidApiKey { .. } => StatusCode::UNAUTHORIZED,
            Self::MissingApiKey { .. } | Self::UnsupportedDriver(_) | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ProviderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::ProviderSubmitFailed { .. }
            | Self::ProviderTaskFailed { .. }
            | Self::ProviderTaskExpired { .. }
            | Self::ProviderNoOutput(_)
            | Self::ProviderUnreachable { .. }
            | Self::ProviderDownloadFailed { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Provider-native error code, when the provider reported one
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            Self::ProviderSubmitFailed { provider_code, .. } | Self::ProviderTaskFailed { provider_code, .. } => {
                provider_code.as_deref()
            }
            _ => None,
        }
    }

    /// Whether the failed call may be repeated as-is
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ProviderUnreachable { retryable, .. } => *retryable,
            Self::ProviderDownloadFailed { status: Some(status), .. } => crate::retry::should_retry_status(*status),
            _ => false,
        }
    }

    /// Map a reqwest transport error
    pub(crate) fn transport(error: &reqwest::Error) -> Self {
        Self::ProviderUnreachable {
            message: error.to_string(),
            retryable: crate::retry::is_retryable_error(error),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_code: Option<&'a str>,
}

impl IntoResponse for GenerationError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            provider_code: self.provider_code(),
        };

        (self.status_code(), Json(body)).into_response()
    }
}
