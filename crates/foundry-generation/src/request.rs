//! Parsing of `POST /api/generate` bodies, JSON or multipart

use axum::{
    Json,
    extract::{FromRequest, Multipart, Request},
    http::header,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{GenerationError, Result};
use crate::resolver::{PathList, UploadedPart, collect_path_candidates};

/// Fields accepted by the generation endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateBody {
    pub prompt: Option<String>,
    pub provider_id: Option<String>,
    /// Older clients send the provider id under this name
    pub model_id: Option<String>,
    /// Provider-side model name
    pub model: Option<String>,
    /// Object, or a JSON object encoded as a string
    pub config: Option<Value>,
    pub image_path: Option<String>,
    pub image_paths: Option<PathList>,
}

impl GenerateBody {
    pub fn provider_id(&self) -> Result<String> {
        self.provider_id
            .as_deref()
            .or(self.model_id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GenerationError::InvalidRequest("providerId is required".to_string()))
    }

    pub fn config(&self) -> Result<Map<String, Value>> {
        match self.config {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(ref map)) => Ok(map.clone()),
            Some(Value::String(ref text)) if text.trim().is_empty() => Ok(Map::new()),
            Some(Value::String(ref text)) => match serde_json::from_str(text) {
                Ok(Value::Object(map)) => Ok(map),
                _ => Err(GenerationError::InvalidConfig("config must be a JSON object".to_string())),
            },
            Some(_) => Err(GenerationError::InvalidConfig("config must be a JSON object".to_string())),
        }
    }

    /// Path candidates in resolution order
    pub fn path_candidates(&mut self) -> Vec<String> {
        collect_path_candidates(self.image_paths.take(), self.image_path.as_deref())
    }
}

/// Read the body as multipart when the content type says so, JSON otherwise
pub async fn read_body(request: Request) -> Result<(GenerateBody, Vec<UploadedPart>)> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| GenerationError::InvalidRequest(e.body_text()))?;
        read_multipart(multipart).await
    } else {
        let Json(body) = Json::<GenerateBody>::from_request(request, &())
            .await
            .map_err(|e| GenerationError::InvalidRequest(e.body_text()))?;
        Ok((body, Vec::new()))
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<(GenerateBody, Vec<UploadedPart>)> {
    let mut body = GenerateBody::default();
    let mut parts = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GenerationError::InvalidRequest(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if field.file_name().is_some() {
            let content_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| GenerationError::InvalidRequest(e.body_text()))?;

            tracing::debug!(field = %name, size = bytes.len(), "received file part");
            parts.push(UploadedPart { content_type, bytes });
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| GenerationError::InvalidRequest(e.body_text()))?;

        match name.as_str() {
            "prompt" => body.prompt = Some(text),
            "providerId" => body.provider_id = Some(text),
            "modelId" => body.model_id = Some(text),
            "model" => body.model = Some(text),
            "config" => body.config = Some(Value::String(text)),
            "imagePath" => body.image_path = Some(text),
            "imagePaths" => body.image_paths = Some(PathList::Text(text)),
            _ => tracing::debug!(field = %name, "ignoring unknown form field"),
        }
    }

    Ok((body, parts))
}
