use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

/// A normalized generation request, with every image already resolved to bytes
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: Option<String>,
    pub images: Vec<ImageInput>,
    pub provider_id: String,
    pub model_id: Option<String>,
    /// Provider-specific knobs, validated by the selected driver
    pub config: Map<String, Value>,
}

impl GenerationRequest {
    /// Prompt with surrounding whitespace removed, if anything is left
    pub fn trimmed_prompt(&self) -> Option<&str> {
        self.prompt.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }
}

/// Where a resolved image came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Multipart upload or `data:` URL
    Inline,
    /// Path relative to the project root
    LocalPath(String),
    RemoteUrl(String),
}

impl ImageSource {
    /// Original reference for metadata, `None` for inline payloads
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::Inline => None,
            Self::LocalPath(path) => Some(path),
            Self::RemoteUrl(url) => Some(url),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageInput {
    pub source: ImageSource,
    pub bytes: Bytes,
    pub mime_type: String,
}

impl ImageInput {
    /// File extension used when uploading the image to a provider
    pub fn upload_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

/// Provider-reported consumption
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_used: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

/// Normalized driver output
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Bytes,
    pub mime_type: String,
    pub usage: Option<Usage>,
    pub meta: Map<String, Value>,
    /// Provider-suggested filename
    pub model_path: Option<String>,
}

/// Location of persisted artifact bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Lowercase hex MD5 of the bytes
    pub content_hash: String,
    /// Forward-slash path relative to the project root
    pub logical_path: String,
}

/// Result returned to callers of the generation endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub logical_path: String,
    pub all_logical_paths: Vec<String>,
    pub content_hash: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub meta: Map<String, Value>,
}
