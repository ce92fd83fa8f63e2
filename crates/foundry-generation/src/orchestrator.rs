use std::time::Instant;

use foundry_config::{Config, ProviderType};
use foundry_telemetry::GenerationMetrics;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::{
    credentials::{Credentials, env_names, requires_key},
    driver::{
        Driver, DriverSettings, OutputKind, dashscope::DashscopeDriver, describe_inputs, doubao::DoubaoDriver,
        gemini::GeminiDriver, hyper3d::Hyper3dDriver, local_timestamp, ltx2::Ltx2Driver, meshy::MeshyDriver,
        trellis::TrellisDriver, tripo::TripoDriver, z_image::ZImageDriver,
    },
    error::{GenerationError, Result},
    key_guard::KeyGuard,
    resolver::InputResolver,
    store::ArtifactStore,
    types::{Artifact, GenerationOutcome, GenerationRequest, StoredArtifact},
};

/// A configured provider id bound to its driver
struct RegisteredProvider {
    provider_type: ProviderType,
    driver: Box<dyn Driver>,
    guard: KeyGuard,
    /// Environment variables consulted for the key
    key_env: Vec<String>,
}

/// Public description of a configured provider
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub provider_type: &'static str,
    pub output: &'static str,
    pub credential_available: bool,
}

/// Routes generation requests to drivers and persists their artifacts
pub struct Orchestrator {
    providers: IndexMap<String, RegisteredProvider>,
    credentials: Credentials,
    resolver: InputResolver,
    store: ArtifactStore,
    metrics: GenerationMetrics,
}

impl Orchestrator {
    /// Check that a request to `provider_id` could be dispatched
    ///
    /// Covers the provider lookup, the key requirement and a recent key
    /// rejection. Run before inputs are fetched so a doomed request makes no
    /// network calls.
    pub fn preflight(&self, provider_id: &str) -> Result<()> {
        let provider = self.provider(provider_id)?;
        let admitted = self.admit(provider_id, provider);

        if let Err(ref e) = admitted {
            self.metrics
                .record_request(provider_id, provider.provider_type.as_str(), e.code(), Instant::now());
            tracing::warn!(provider = %provider_id, code = e.code(), error = %e, "generation refused");
        }

        admitted
    }

    /// Run one generation request to a stored artifact
    ///
    /// The provider is chosen by `request.provider_id`. A provider that needs
    /// a key and has none fails before any network activity.
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome> {
        let provider = self.provider(&request.provider_id)?;

        let start = Instant::now();
        let result = self.run(provider, &request).await;

        let outcome = match result {
            Ok(_) => "success",
            Err(ref e) => e.code(),
        };
        self.metrics
            .record_request(&request.provider_id, provider.provider_type.as_str(), outcome, start);

        match result {
            Ok(ref generated) => tracing::info!(
                provider = %request.provider_id,
                path = %generated.logical_path,
                elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                "generation complete"
            ),
            Err(ref e) => tracing::warn!(
                provider = %request.provider_id,
                code = e.code(),
                error = %e,
                "generation failed"
            ),
        }

        result
    }

    fn provider(&self, provider_id: &str) -> Result<&RegisteredProvider> {
        self.providers
            .get(provider_id)
            .ok_or_else(|| GenerationError::UnsupportedDriver(provider_id.to_string()))
    }

    fn admit(&self, provider_id: &str, provider: &RegisteredProvider) -> Result<()> {
        if requires_key(provider.provider_type) && self.credentials.get(provider_id).is_none() {
            return Err(GenerationError::MissingApiKey {
                provider: provider_id.to_string(),
                env_hint: provider.key_env.join(", "),
            });
        }

        provider.guard.check()
    }

    async fn run(&self, provider: &RegisteredProvider, request: &GenerationRequest) -> Result<GenerationOutcome> {
        self.admit(&request.provider_id, provider)?;

        tracing::debug!(
            provider = %request.provider_id,
            driver = %provider.provider_type,
            images = request.images.len(),
            has_prompt = request.trimmed_prompt().is_some(),
            "dispatching generation request"
        );

        let result = provider
            .driver
            .generate(
                self.credentials.get(&request.provider_id),
                request.model_id.as_deref(),
                request.trimmed_prompt(),
                &request.images,
                &request.config,
            )
            .await;
        provider.guard.observe(&result);

        let artifact = result?;
        self.persist(provider, request, artifact).await
    }

    async fn persist(
        &self,
        provider: &RegisteredProvider,
        request: &GenerationRequest,
        artifact: Artifact,
    ) -> Result<GenerationOutcome> {
        let category = provider.driver.output().category();

        let stored = self
            .store
            .store(category, &artifact.bytes, &artifact.mime_type, artifact.model_path.as_deref())
            .await?;

        let mut meta = artifact.meta;
        meta.insert("providerId".into(), json!(request.provider_id));
        meta.entry("createdAt").or_insert_with(|| json!(local_timestamp()));
        if !request.images.is_empty() {
            meta.entry("inputImages")
                .or_insert_with(|| describe_inputs(&request.images));
        }

        let mut all_logical_paths = vec![stored.logical_path.clone()];

        if category.has_result_dir() {
            let sidecar = result_meta(provider.provider_type, request, &meta, &stored, &artifact.mime_type, artifact.bytes.len());
            let meta_path = self.store.write_meta(&stored, &sidecar).await?;
            all_logical_paths.push(meta_path);
        }

        Ok(GenerationOutcome {
            logical_path: stored.logical_path,
            all_logical_paths,
            content_hash: stored.content_hash,
            mime_type: artifact.mime_type,
            usage: artifact.usage,
            meta,
        })
    }

    /// Configured providers, in configuration order
    pub fn providers(&self) -> Vec<ProviderSummary> {
        self.providers
            .iter()
            .map(|(id, provider)| ProviderSummary {
                id: id.clone(),
                provider_type: provider.provider_type.as_str(),
                output: match provider.driver.output() {
                    OutputKind::Image => "image",
                    OutputKind::Model => "model",
                    OutputKind::Video => "video",
                },
                credential_available: !requires_key(provider.provider_type) || self.credentials.get(id).is_some(),
            })
            .collect()
    }

    pub fn resolver(&self) -> &InputResolver {
        &self.resolver
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }
}

/// Contents of the `meta.json` written beside model and video results
fn result_meta(
    provider_type: ProviderType,
    request: &GenerationRequest,
    meta: &Map<String, Value>,
    stored: &StoredArtifact,
    mime_type: &str,
    size: usize,
) -> Value {
    let field = |key: &str| meta.get(key).cloned().unwrap_or(Value::Null);
    let file_name = stored.logical_path.rsplit('/').next().unwrap_or(&stored.logical_path);

    json!({
        "providerId": request.provider_id,
        "driver": provider_type.as_str(),
        "model": request.model_id.clone().map_or_else(|| field("model"), Value::String),
        "taskId": field("taskId"),
        "taskType": field("taskType"),
        "mode": field("mode"),
        "prompt": request.trimmed_prompt(),
        "parameters": Value::Object(request.config.clone()),
        "inputImages": field("inputImages"),
        "file": {
            "name": file_name,
            "size": size,
            "mimeType": mime_type,
            "contentHash": stored.content_hash,
        },
        "createdAt": field("createdAt"),
    })
}

/// Builder for constructing the orchestrator from configuration
pub struct OrchestratorBuilder<'a> {
    config: &'a Config,
    credentials: Option<Credentials>,
    metrics: Option<GenerationMetrics>,
}

impl<'a> OrchestratorBuilder<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            credentials: None,
            metrics: None,
        }
    }

    /// Use these credentials instead of reading the process environment
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: GenerationMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Orchestrator {
        let metrics = self.metrics.unwrap_or_default();
        let mut providers = IndexMap::new();

        for (id, provider_config) in &self.config.providers {
            tracing::debug!(provider = %id, driver = %provider_config.provider_type, "initializing generation provider");

            let settings = DriverSettings {
                name: id.clone(),
                base_url: provider_config.base_url.clone(),
                default_model: provider_config.default_model.clone(),
                poll: provider_config.poll.clone(),
                metrics: metrics.clone(),
            };

            let driver: Box<dyn Driver> = match provider_config.provider_type {
                ProviderType::Gemini => Box::new(GeminiDriver::new(&settings)),
                ProviderType::Tripo => Box::new(TripoDriver::new(&settings)),
                ProviderType::Meshy => Box::new(MeshyDriver::new(&settings)),
                ProviderType::Hyper3d => Box::new(Hyper3dDriver::new(&settings)),
                ProviderType::Ltx2 => Box::new(Ltx2Driver::new(&settings)),
                ProviderType::Trellis => Box::new(TrellisDriver::new(&settings)),
                ProviderType::Dashscope => Box::new(DashscopeDriver::new(&settings)),
                ProviderType::Doubao => Box::new(DoubaoDriver::new(&settings)),
                ProviderType::ZImage => Box::new(ZImageDriver::new(&settings)),
            };

            providers.insert(
                id.clone(),
                RegisteredProvider {
                    provider_type: provider_config.provider_type,
                    driver,
                    guard: KeyGuard::new(id),
                    key_env: env_names(provider_config).into_iter().map(str::to_string).collect(),
                },
            );
        }

        if providers.is_empty() {
            tracing::debug!("No generation providers configured");
        } else {
            tracing::debug!("Generation orchestrator initialized with {} provider(s)", providers.len());
        }

        let credentials = self
            .credentials
            .unwrap_or_else(|| Credentials::from_env(&self.config.providers));

        Orchestrator {
            providers,
            credentials,
            resolver: InputResolver::new(self.config.storage.project_root.clone()),
            store: ArtifactStore::new(&self.config.storage),
            metrics,
        }
    }
}
