#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions
)]

pub mod credentials;
mod driver;
mod error;
mod http_client;
mod key_guard;
mod orchestrator;
pub mod poller;
mod request;
pub mod resolver;
mod retry;
pub mod store;
mod types;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Request, State},
    routing::{get, post},
};

pub use credentials::Credentials;
pub use driver::OutputKind;
pub use error::{GenerationError, Result};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, ProviderSummary};
pub use types::{Artifact, GenerationOutcome, GenerationRequest, ImageInput, ImageSource, StoredArtifact, Usage};

/// Build the generation orchestrator from configuration
///
/// API keys are resolved from the configuration and the process environment.
pub fn build_orchestrator(config: &foundry_config::Config) -> Arc<Orchestrator> {
    Arc::new(OrchestratorBuilder::new(config).build())
}

/// Create the endpoint router for generation
pub fn endpoint_router() -> Router<Arc<Orchestrator>> {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/providers", get(list_providers))
}

/// Handle generation requests sent as JSON or multipart form data
async fn generate(State(orchestrator): State<Arc<Orchestrator>>, request: Request) -> Result<Json<GenerationOutcome>> {
    let (mut body, parts) = request::read_body(request).await?;

    let provider_id = body.provider_id()?;
    let config = body.config()?;
    let candidates = body.path_candidates();

    tracing::debug!(
        provider = %provider_id,
        uploads = parts.len(),
        paths = candidates.len(),
        "generation handler called"
    );

    // Refuse before fetching any remote image paths
    orchestrator.preflight(&provider_id)?;

    let images = orchestrator.resolver().resolve(parts, &candidates).await;

    let outcome = orchestrator
        .generate(GenerationRequest {
            prompt: body.prompt,
            images,
            provider_id,
            model_id: body.model.filter(|model| !model.trim().is_empty()),
            config,
        })
        .await?;

    Ok(Json(outcome))
}

/// List configured providers without exposing credentials
async fn list_providers(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Vec<ProviderSummary>> {
    Json(orchestrator.providers())
}
