//! Mock generation providers for integration tests
//!
//! One axum server implements the Gemini, Tripo, Meshy, Hyper3D, LTX-2,
//! TRELLIS.2, DashScope, Doubao and Z-Image wire protocols with canned,
//! predictable responses. Z-Image is mounted under `/zimage` because its
//! `/generate` route collides with TRELLIS.2.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use base64::Engine;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::config::REJECTED_KEY;

/// Bytes Gemini returns as its generated image
pub const GEMINI_IMAGE: &[u8] = b"\x89PNG-gemini-image";

/// Bytes TRELLIS.2 returns as its generated model
pub const TRELLIS_MODEL: &[u8] = b"glTF-trellis-model";

/// Tripo prompt that produces a failed task
pub const TRIPO_FAILING_PROMPT: &str = "explode";

/// Message of the failed Tripo task, passed through verbatim
pub const TRIPO_FAILURE_MESSAGE: &str = "Model generation failed: content policy";

/// LTX-2 prompt the service refuses at submission
pub const LTX_REFUSED_PROMPT: &str = "oom";

/// Meshy image-to-3D task, whose only export is FBX
pub const MESHY_IMAGE_TASK: &str = "meshy-image-1";

/// Wanx prompt whose task fails content inspection
pub const WANX_FAILING_PROMPT: &str = "forbidden";

/// Bytes Z-Image returns as its generated image
pub const Z_IMAGE_IMAGE: &[u8] = b"\x89PNG-z-image";

/// Mock provider backend with per-endpoint request counters
pub struct MockProviders {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    base_url: String,
    request_count: AtomicU32,
    gemini_count: AtomicU32,
    tripo_status_count: AtomicU32,
    meshy_submissions: Mutex<Vec<Value>>,
    rodin_fields: Mutex<Vec<String>>,
    rodin_status_count: AtomicU32,
    rodin_download_count: AtomicU32,
    ltx_list_count: AtomicU32,
    trellis_count: AtomicU32,
    wanx_status_count: AtomicU32,
    seedream_submissions: Mutex<Vec<Value>>,
    z_image_submissions: Mutex<Vec<Value>>,
    download_count: AtomicU32,
}

impl MockProviders {
    /// Start the mock server, returning immediately
    pub async fn start() -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(MockState {
            base_url: format!("http://{addr}"),
            request_count: AtomicU32::new(0),
            gemini_count: AtomicU32::new(0),
            tripo_status_count: AtomicU32::new(0),
            meshy_submissions: Mutex::new(Vec::new()),
            rodin_fields: Mutex::new(Vec::new()),
            rodin_status_count: AtomicU32::new(0),
            rodin_download_count: AtomicU32::new(0),
            ltx_list_count: AtomicU32::new(0),
            trellis_count: AtomicU32::new(0),
            wanx_status_count: AtomicU32::new(0),
            seedream_submissions: Mutex::new(Vec::new()),
            z_image_submissions: Mutex::new(Vec::new()),
            download_count: AtomicU32::new(0),
        });

        let app = Router::new()
            // Gemini
            .route("/v1beta/models/{model}", routing::post(handle_gemini))
            // Tripo
            .route("/v2/openapi/upload", routing::post(handle_tripo_upload))
            .route("/v2/openapi/task", routing::post(handle_tripo_task))
            .route("/v2/openapi/task/{id}", routing::get(handle_tripo_status))
            // Meshy
            .route("/openapi/v2/text-to-3d", routing::post(handle_meshy_submit))
            .route("/openapi/v2/text-to-3d/{id}", routing::get(handle_meshy_status))
            .route("/openapi/v1/image-to-3d", routing::post(handle_meshy_submit))
            .route("/openapi/v1/image-to-3d/{id}", routing::get(handle_meshy_status))
            // Hyper3D Rodin
            .route("/api/v2/rodin", routing::post(handle_rodin_submit))
            .route("/api/v2/status", routing::post(handle_rodin_status))
            .route("/api/v2/download", routing::post(handle_rodin_download))
            // LTX-2
            .route("/generate/text2video", routing::post(handle_ltx_text2video))
            .route("/generate/image2video/upload", routing::post(handle_ltx_image2video))
            .route("/list", routing::get(handle_ltx_list))
            .route("/download/{id}", routing::get(handle_ltx_download))
            // TRELLIS.2
            .route("/generate", routing::post(handle_trellis))
            // DashScope Wanx
            .route(
                "/api/v1/services/aigc/text2image/image-synthesis",
                routing::post(handle_wanx_submit),
            )
            .route("/api/v1/tasks/{id}", routing::get(handle_wanx_status))
            // Doubao Seedream
            .route("/api/v3/images/generations", routing::post(handle_seedream))
            // Z-Image
            .route("/zimage/generate", routing::post(handle_z_image))
            // Result files
            .route("/files/{name}", routing::get(handle_file))
            .with_state(Arc::clone(&state));

        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring the mock as a provider
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Every request received, across all providers
    pub fn request_count(&self) -> u32 {
        self.state.request_count.load(Ordering::Relaxed)
    }

    pub fn gemini_count(&self) -> u32 {
        self.state.gemini_count.load(Ordering::Relaxed)
    }

    pub fn tripo_status_count(&self) -> u32 {
        self.state.tripo_status_count.load(Ordering::Relaxed)
    }

    /// JSON bodies submitted to Meshy, in order
    pub fn meshy_submissions(&self) -> Vec<Value> {
        self.state.meshy_submissions.lock().unwrap().clone()
    }

    /// Multipart field names of the last Rodin submission
    pub fn rodin_fields(&self) -> Vec<String> {
        self.state.rodin_fields.lock().unwrap().clone()
    }

    pub fn rodin_status_count(&self) -> u32 {
        self.state.rodin_status_count.load(Ordering::Relaxed)
    }

    /// Rodin result listings, including the failed first one
    pub fn rodin_download_count(&self) -> u32 {
        self.state.rodin_download_count.load(Ordering::Relaxed)
    }

    pub fn ltx_list_count(&self) -> u32 {
        self.state.ltx_list_count.load(Ordering::Relaxed)
    }

    pub fn trellis_count(&self) -> u32 {
        self.state.trellis_count.load(Ordering::Relaxed)
    }

    pub fn wanx_status_count(&self) -> u32 {
        self.state.wanx_status_count.load(Ordering::Relaxed)
    }

    /// JSON bodies submitted to Seedream, in order
    pub fn seedream_submissions(&self) -> Vec<Value> {
        self.state.seedream_submissions.lock().unwrap().clone()
    }

    /// JSON bodies submitted to Z-Image, in order
    pub fn z_image_submissions(&self) -> Vec<Value> {
        self.state.z_image_submissions.lock().unwrap().clone()
    }

    /// Result file downloads
    pub fn download_count(&self) -> u32 {
        self.state.download_count.load(Ordering::Relaxed)
    }
}

impl Drop for MockProviders {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Bytes served for a result file
pub fn file_bytes(name: &str) -> Vec<u8> {
    format!("model:{name}").into_bytes()
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"code": 1002, "message": "Invalid API key"})),
    )
        .into_response()
}

/// Count the request and reject the known-bad key
fn accept(state: &MockState, headers: &HeaderMap) -> Result<(), Response> {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let goog = headers.get("x-goog-api-key").and_then(|value| value.to_str().ok());

    if bearer == Some(REJECTED_KEY) || goog == Some(REJECTED_KEY) {
        return Err(unauthorized());
    }

    Ok(())
}

// -- Gemini --

async fn handle_gemini(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(model): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }
    state.gemini_count.fetch_add(1, Ordering::Relaxed);

    if !model.ends_with(":generateContent") || body["contents"][0]["parts"].as_array().is_none() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": {"message": "bad request"}}))).into_response();
    }

    let data = base64::engine::general_purpose::STANDARD.encode(GEMINI_IMAGE);

    Json(json!({
        "candidates": [{
            "content": {
                "parts": [
                    {"text": "Here is your image"},
                    {"inlineData": {"mimeType": "image/png", "data": data}},
                ]
            }
        }],
        "usageMetadata": {"totalTokenCount": 1290},
    }))
    .into_response()
}

// -- Tripo --

async fn handle_tripo_upload(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }

    Json(json!({"code": 0, "data": {"image_token": "tok-1"}})).into_response()
}

async fn handle_tripo_task(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }

    let task_id = if body["prompt"] == TRIPO_FAILING_PROMPT {
        "tripo-task-fail"
    } else {
        "tripo-task-1"
    };

    Json(json!({"code": 0, "data": {"task_id": task_id}})).into_response()
}

async fn handle_tripo_status(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }
    let calls = state.tripo_status_count.fetch_add(1, Ordering::Relaxed) + 1;

    if id == "tripo-task-fail" {
        return Json(json!({
            "code": 0,
            "data": {"task_id": id, "status": "failed", "error": TRIPO_FAILURE_MESSAGE}
        }))
        .into_response();
    }

    // Running on the first check, finished afterwards
    if calls == 1 {
        return Json(json!({"code": 0, "data": {"task_id": id, "status": "running", "progress": 50}})).into_response();
    }

    Json(json!({
        "code": 0,
        "data": {
            "task_id": id,
            "status": "success",
            "consumed_credit": 20,
            "output": {"pbr_model": format!("{}/files/cube.glb", state.base_url)},
        }
    }))
    .into_response()
}

// -- Meshy --

async fn handle_meshy_submit(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }

    let task_id = match body["mode"].as_str() {
        Some("preview") => "meshy-preview-1",
        Some("refine") => "meshy-refine-1",
        _ => MESHY_IMAGE_TASK,
    };
    state.meshy_submissions.lock().unwrap().push(body);

    Json(json!({"result": task_id})).into_response()
}

async fn handle_meshy_status(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }

    let base = &state.base_url;

    // Image tasks only export FBX
    let model_urls = if id == MESHY_IMAGE_TASK {
        json!({"fbx": format!("{base}/files/{id}.fbx")})
    } else {
        json!({
            "fbx": format!("{base}/files/{id}.fbx"),
            "glb": format!("{base}/files/{id}.glb"),
        })
    };

    Json(json!({
        "id": id,
        "status": "SUCCEEDED",
        "progress": 100,
        "model_urls": model_urls,
        "texture_urls": [{"base_color": format!("{base}/files/{id}_color.png")}],
        "thumbnail_url": format!("{base}/files/{id}.png"),
    }))
    .into_response()
}

// -- Hyper3D Rodin --

async fn handle_rodin_submit(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }

    let mut fields = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        fields.push(field.name().unwrap_or_default().to_owned());
    }
    *state.rodin_fields.lock().unwrap() = fields;

    Json(json!({
        "error": null,
        "uuid": "rodin-task-1",
        "jobs": {"uuids": ["job-a", "job-b"], "subscription_key": "sub-1"},
    }))
    .into_response()
}

async fn handle_rodin_status(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }
    let calls = state.rodin_status_count.fetch_add(1, Ordering::Relaxed) + 1;

    if body["subscription_key"] != "sub-1" {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "unknown subscription"}))).into_response();
    }

    let second = if calls == 1 { "Generating" } else { "Done" };
    Json(json!({"jobs": [
        {"uuid": "job-a", "status": "Done"},
        {"uuid": "job-b", "status": second},
    ]}))
    .into_response()
}

async fn handle_rodin_download(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }

    // The first listing hits a busy gateway
    if state.rodin_download_count.fetch_add(1, Ordering::Relaxed) == 0 {
        return (StatusCode::SERVICE_UNAVAILABLE, "upstream busy").into_response();
    }

    let base = &state.base_url;
    Json(json!({"list": [
        {"name": "preview.webp", "url": format!("{base}/files/preview.webp")},
        {"name": "base_basic_pbr.glb", "url": format!("{base}/files/base_basic_pbr.glb")},
    ]}))
    .into_response()
}

// -- LTX-2 --

fn ltx_accepted(task_id: &str) -> Value {
    json!({
        "success": true,
        "task_id": task_id,
        "video_url": format!("/download/{task_id}"),
        "video_path": format!("/outputs/{task_id}.mp4"),
        "duration": 2.5,
        "message": "ok",
    })
}

async fn handle_ltx_text2video(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    if body["prompt"] == LTX_REFUSED_PROMPT {
        return Json(json!({
            "success": false,
            "task_id": "t2v_refused",
            "duration": 0.1,
            "message": "CUDA out of memory",
        }))
        .into_response();
    }

    Json(ltx_accepted("t2v_test")).into_response()
}

async fn handle_ltx_image2video(State(state): State<Arc<MockState>>, mut multipart: Multipart) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);

    let mut has_image = false;
    while let Ok(Some(field)) = multipart.next_field().await {
        has_image |= field.name() == Some("image");
    }

    if !has_image {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "image is required"}))).into_response();
    }

    // Image jobs are acknowledged before the video is listed
    let mut accepted = ltx_accepted("i2v_test");
    accepted["video_url"] = Value::Null;
    Json(accepted).into_response()
}

async fn handle_ltx_list(State(state): State<Arc<MockState>>) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    state.ltx_list_count.fetch_add(1, Ordering::Relaxed);

    Json(json!({
        "count": 2,
        "videos": (["t2v_test", "i2v_test"].iter().map(|id| json!({
            "task_id": id,
            "filename": format!("{id}.mp4"),
            "download_url": format!("/download/{id}"),
        })).collect::<Vec<_>>()),
    }))
    .into_response()
}

async fn handle_ltx_download(State(state): State<Arc<MockState>>, Path(id): Path<String>) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    state.download_count.fetch_add(1, Ordering::Relaxed);

    ([(header::CONTENT_TYPE, "video/mp4")], file_bytes(&format!("{id}.mp4"))).into_response()
}

// -- TRELLIS.2 --

async fn handle_trellis(State(state): State<Arc<MockState>>, mut multipart: Multipart) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    state.trellis_count.fetch_add(1, Ordering::Relaxed);

    let mut has_image = false;
    while let Ok(Some(field)) = multipart.next_field().await {
        has_image |= field.name() == Some("image");
    }

    if !has_image {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "image is required"}))).into_response();
    }

    ([(header::CONTENT_TYPE, "model/gltf-binary")], TRELLIS_MODEL).into_response()
}

// -- DashScope Wanx --

async fn handle_wanx_submit(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }

    if headers.get("x-dashscope-async").and_then(|v| v.to_str().ok()) != Some("enable") {
        return Json(json!({
            "code": "AccessDenied",
            "message": "current user api does not support synchronous calls",
        }))
        .into_response();
    }

    let task_id = if body["input"]["prompt"] == WANX_FAILING_PROMPT {
        "wanx-task-fail"
    } else {
        "wanx-task-1"
    };

    Json(json!({
        "request_id": "req-1",
        "output": {"task_id": task_id, "task_status": "PENDING"},
    }))
    .into_response()
}

async fn handle_wanx_status(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }
    let calls = state.wanx_status_count.fetch_add(1, Ordering::Relaxed) + 1;

    if id == "wanx-task-fail" {
        return Json(json!({"output": {
            "task_id": id,
            "task_status": "FAILED",
            "code": "DataInspectionFailed",
            "message": "Input data may contain inappropriate content.",
        }}))
        .into_response();
    }

    // Running on the first check, finished afterwards
    if calls == 1 {
        return Json(json!({"output": {"task_id": id, "task_status": "RUNNING"}})).into_response();
    }

    Json(json!({"output": {
        "task_id": id,
        "task_status": "SUCCEEDED",
        "results": [{"url": format!("{}/files/wanx.png", state.base_url)}],
    }}))
    .into_response()
}

// -- Doubao Seedream --

async fn handle_seedream(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = accept(&state, &headers) {
        return response;
    }
    state.seedream_submissions.lock().unwrap().push(body);

    Json(json!({
        "model": "doubao-seedream-4-5-251128",
        "created": 1_757_321_139,
        "data": [{"url": format!("{}/files/seedream.jpeg", state.base_url), "size": "2048x2048"}],
        "usage": {"generated_images": 1, "output_tokens": 16384, "total_tokens": 16384},
    }))
    .into_response()
}

// -- Z-Image --

async fn handle_z_image(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    state.z_image_submissions.lock().unwrap().push(body);

    ([(header::CONTENT_TYPE, "image/png")], Z_IMAGE_IMAGE).into_response()
}

// -- Result files --

async fn handle_file(State(state): State<Arc<MockState>>, Path(name): Path<String>) -> Response {
    state.request_count.fetch_add(1, Ordering::Relaxed);
    state.download_count.fetch_add(1, Ordering::Relaxed);

    // CDNs rarely label model files precisely
    ([(header::CONTENT_TYPE, "application/octet-stream")], file_bytes(&name)).into_response()
}
