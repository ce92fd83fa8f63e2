use std::path::PathBuf;

use serde::Deserialize;

/// Artifact storage layout
///
/// Logical paths handed back to callers are relative to `project_root`
/// and always start with `upload_root`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory that logical paths are resolved against
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    /// Upload directory below `project_root`, also the public URL prefix
    #[serde(default = "default_upload_root")]
    pub upload_root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            upload_root: default_upload_root(),
        }
    }
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_upload_root() -> String {
    "uploads".to_string()
}
