//! Normalization of request image inputs into bytes + MIME type

use std::path::{Component, Path, PathBuf};

use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;

use crate::http_client::{SHORT_TIMEOUT, http_client};
use crate::types::{ImageInput, ImageSource};

/// Legacy prefix from when uploads lived under the backend directory
const LEGACY_STORAGE_PREFIX: &str = "backend/";

/// A file part received in a multipart request
#[derive(Debug, Clone)]
pub struct UploadedPart {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// The `imagePaths` field: a real array, a JSON array in a string, or a comma-separated string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PathList {
    List(Vec<String>),
    Text(String),
}

impl PathList {
    pub fn into_candidates(self) -> Vec<String> {
        match self {
            Self::List(items) => items,
            Self::Text(text) => parse_path_text(&text),
        }
    }
}

/// Split a textual path list, trying JSON first and commas second
pub fn parse_path_text(text: &str) -> Vec<String> {
    let items = match serde_json::from_str::<Vec<String>>(text) {
        Ok(items) => items,
        Err(_) => text.split(',').map(str::to_string).collect(),
    };

    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Ordered path candidates: the list field first, then the single field
pub fn collect_path_candidates(list: Option<PathList>, single: Option<&str>) -> Vec<String> {
    let mut candidates = list.map(PathList::into_candidates).unwrap_or_default();

    if let Some(single) = single.map(str::trim).filter(|s| !s.is_empty()) {
        candidates.push(single.to_string());
    }

    candidates
}

#[derive(Debug, Error)]
enum Unresolvable {
    #[error("path escapes the project root")]
    EscapesRoot,
    #[error("empty path")]
    EmptyPath,
    #[error("malformed data URL")]
    MalformedDataUrl,
    #[error("failed to read file: {0}")]
    Read(#[from] std::io::Error),
    #[error("fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error("fetch returned status {0}")]
    Status(u16),
}

/// Turns uploaded parts and path candidates into resolved images
///
/// Items that cannot be resolved are logged and skipped; the order of
/// the remaining items follows the input order.
pub struct InputResolver {
    project_root: PathBuf,
}

impl InputResolver {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub async fn resolve(&self, parts: Vec<UploadedPart>, candidates: &[String]) -> Vec<ImageInput> {
        let mut images = Vec::with_capacity(parts.len() + candidates.len());

        for part in parts {
            match part.content_type {
                Some(content_type) if content_type.starts_with("image/") => images.push(ImageInput {
                    source: ImageSource::Inline,
                    bytes: part.bytes,
                    mime_type: content_type,
                }),
                other => {
                    tracing::warn!(content_type = ?other, "skipping non-image upload");
                }
            }
        }

        for candidate in candidates {
            match self.resolve_candidate(candidate).await {
                Ok(image) => images.push(image),
                Err(e) => {
                    tracing::warn!(input = %describe(candidate), error = %e, "skipping unresolvable image input");
                }
            }
        }

        images
    }

    async fn resolve_candidate(&self, candidate: &str) -> Result<ImageInput, Unresolvable> {
        if candidate.starts_with("http://") || candidate.starts_with("https://") {
            return fetch_remote(candidate).await;
        }

        if let Some(rest) = candidate.strip_prefix("data:") {
            return decode_data_url(rest);
        }

        let relative = normalize_local_path(candidate)?;
        let bytes = tokio::fs::read(self.project_root.join(&relative)).await?;

        Ok(ImageInput {
            source: ImageSource::LocalPath(candidate.to_string()),
            bytes: Bytes::from(bytes),
            mime_type: mime_from_extension(&relative).to_string(),
        })
    }
}

async fn fetch_remote(url: &str) -> Result<ImageInput, Unresolvable> {
    let response = http_client().get(url).timeout(SHORT_TIMEOUT).send().await?;

    if !response.status().is_success() {
        return Err(Unresolvable::Status(response.status().as_u16()));
    }

    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("image/png")
        .to_string();

    Ok(ImageInput {
        source: ImageSource::RemoteUrl(url.to_string()),
        bytes: response.bytes().await?,
        mime_type,
    })
}

/// Decode the part of a `data:` URL after the scheme
fn decode_data_url(rest: &str) -> Result<ImageInput, Unresolvable> {
    let (header, payload) = rest.split_once(',').ok_or(Unresolvable::MalformedDataUrl)?;
    let mime_type = header.strip_suffix(";base64").ok_or(Unresolvable::MalformedDataUrl)?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| Unresolvable::MalformedDataUrl)?;

    Ok(ImageInput {
        source: ImageSource::Inline,
        bytes: Bytes::from(bytes),
        mime_type: if mime_type.is_empty() { "image/png" } else { mime_type }.to_string(),
    })
}

/// Strip leading slashes and the legacy prefix; refuse anything that leaves the root
fn normalize_local_path(candidate: &str) -> Result<PathBuf, Unresolvable> {
    let trimmed = candidate.trim_start_matches(['/', '\\']);
    let trimmed = trimmed.strip_prefix(LEGACY_STORAGE_PREFIX).unwrap_or(trimmed);

    let path = Path::new(trimmed);
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return Err(Unresolvable::EscapesRoot),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(Unresolvable::EmptyPath);
    }

    Ok(normalized)
}

fn mime_from_extension(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

/// Short form of an input for logs; inline payloads are not echoed
fn describe(candidate: &str) -> &str {
    if candidate.starts_with("data:") { "data:..." } else { candidate }
}
