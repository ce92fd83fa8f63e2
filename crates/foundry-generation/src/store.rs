//! Content-addressed artifact persistence
//!
//! Bytes are keyed by their MD5 digest and sharded by its first four hex
//! characters: `<upload_root>/<category>/ab/cd/<digest>.<ext>`. Model and
//! video results get a directory of their own so a `meta.json` can sit next
//! to the file.

use std::path::{Path, PathBuf};

use foundry_config::StorageConfig;
use serde_json::Value;

use crate::error::{GenerationError, Result};
use crate::types::StoredArtifact;

/// Storage category, the first directory below the upload root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactCategory {
    EvalImages,
    Examples,
    Models,
    Videos,
}

impl ArtifactCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EvalImages => "eval-images",
            Self::Examples => "examples",
            Self::Models => "models",
            Self::Videos => "videos",
        }
    }

    /// Extension used when the MIME type is not in the table
    pub const fn default_extension(self) -> &'static str {
        match self {
            Self::EvalImages => ".png",
            Self::Examples => "",
            Self::Models => ".glb",
            Self::Videos => ".mp4",
        }
    }

    /// Whether results live in a per-result directory with `meta.json`
    pub const fn has_result_dir(self) -> bool {
        matches!(self, Self::Models | Self::Videos)
    }
}

/// Known extension (with leading dot) for a MIME type
fn extension_from_mime(mime_type: &str) -> Option<&'static str> {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();

    Some(match essence.to_ascii_lowercase().as_str() {
        "image/png" => ".png",
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/webp" => ".webp",
        "image/gif" => ".gif",
        "model/gltf-binary" => ".glb",
        "model/gltf+json" => ".gltf",
        "model/vnd.usdz+zip" => ".usdz",
        "model/obj" => ".obj",
        "model/fbx" => ".fbx",
        "video/mp4" => ".mp4",
        _ => return None,
    })
}

/// Known extension (with leading dot) of a file name
fn extension_from_name(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();

    Some(match ext.as_str() {
        "glb" => ".glb",
        "gltf" => ".gltf",
        "fbx" => ".fbx",
        "obj" => ".obj",
        "usdz" => ".usdz",
        "png" => ".png",
        "jpg" | "jpeg" => ".jpg",
        "webp" => ".webp",
        "gif" => ".gif",
        "mp4" => ".mp4",
        _ => return None,
    })
}

/// File extension (with leading dot) for stored bytes
///
/// A recognized MIME type decides. Generic ones such as
/// `application/octet-stream` fall back to the provider's file name, then
/// to the category default.
pub fn extension_for(mime_type: &str, file_name: Option<&str>, category: ArtifactCategory) -> &'static str {
    extension_from_mime(mime_type)
        .or_else(|| file_name.and_then(extension_from_name))
        .unwrap_or_else(|| category.default_extension())
}

/// Lowercase hex MD5 digest
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

pub struct ArtifactStore {
    project_root: PathBuf,
    upload_root: String,
}

impl ArtifactStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            project_root: config.project_root.clone(),
            upload_root: config.upload_root.trim_matches('/').to_string(),
        }
    }

    /// Persist `bytes` and return their stable logical path
    ///
    /// `file_name` is the provider's name for the result, used only for its
    /// extension.
    ///
    /// Writing the same bytes twice yields the same path; the second write
    /// is skipped when a file of the same length is already there.
    pub async fn store(
        &self,
        category: ArtifactCategory,
        bytes: &[u8],
        mime_type: &str,
        file_name: Option<&str>,
    ) -> Result<StoredArtifact> {
        let hash = content_hash(bytes);
        let logical_path = self.logical_path(category, &hash, extension_for(mime_type, file_name, category));
        let absolute = self.resolve(&logical_path);

        if let Ok(existing) = tokio::fs::metadata(&absolute).await
            && existing.is_file()
            && existing.len() == bytes.len() as u64
        {
            tracing::debug!(path = %logical_path, "artifact already stored");
        } else {
            write_file(&absolute, bytes).await?;
            tracing::debug!(path = %logical_path, size = bytes.len(), "stored artifact");
        }

        Ok(StoredArtifact {
            content_hash: hash,
            logical_path,
        })
    }

    /// Write `meta.json` beside a model or video result
    ///
    /// Overwrites any previous metadata for the same bytes.
    pub async fn write_meta(&self, stored: &StoredArtifact, meta: &Value) -> Result<String> {
        let file_path = self.resolve(&stored.logical_path);
        let meta_path = file_path.with_file_name("meta.json");

        let body = serde_json::to_vec_pretty(meta).map_err(|e| GenerationError::Storage(e.into()))?;
        write_file(&meta_path, &body).await?;

        Ok(stored
            .logical_path
            .rsplit_once('/')
            .map_or_else(|| "meta.json".to_string(), |(dir, _)| format!("{dir}/meta.json")))
    }

    /// Absolute file-system path for a logical path
    pub fn resolve(&self, logical_path: &str) -> PathBuf {
        logical_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.project_root.clone(), |path, segment| path.join(segment))
    }

    fn logical_path(&self, category: ArtifactCategory, hash: &str, extension: &str) -> String {
        let shard = format!("{}/{}/{}/{}", self.upload_root, category.as_str(), &hash[..2], &hash[2..4]);

        if category.has_result_dir() {
            format!("{shard}/{hash}/{hash}{extension}")
        } else {
            format!("{shard}/{hash}{extension}")
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            tracing::error!(path = %parent.display(), error = %e, "failed to create artifact directory");
            GenerationError::Storage(e)
        })?;
    }

    tokio::fs::write(path, bytes).await.map_err(|e| {
        tracing::error!(path = %path.display(), error = %e, "failed to write artifact");
        GenerationError::Storage(e)
    })
}
