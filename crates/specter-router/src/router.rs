use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use specter_cache::{response_cache_key, BoundedCache, ROUTER_CACHE_CAPACITY};
use specter_core::{
    now_millis, CancelToken, ChunkCallback, GenerationResponse, InferenceRequest, Modality,
    ModelConfig, Provider, RequestContent, ResponseMetadata, SpecterError, StreamingCallbacks,
};
use specter_service::InferenceService;
use tokio::sync::RwLock;

use crate::session::SessionRegistry;

/// Fixed reply for the audio modality until transcription lands.
pub const AUDIO_NOT_IMPLEMENTED: &str = "Audio transcription not yet implemented";

/// Capability interface every provider variant implements. Generation
/// receives the resolved model config and an optional cumulative-text
/// observer.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn generate(
        &self,
        request: &InferenceRequest,
        config: &ModelConfig,
        on_chunk: Option<&ChunkCallback>,
        cancel: &CancelToken,
    ) -> Result<String, SpecterError>;
}

/// Routes Ollama-provider requests to the single-model service by
/// modality: text to the short-question path, images to the screenshot
/// pipeline, audio to the fixed placeholder (no network).
pub struct OllamaProvider {
    service: Arc<InferenceService>,
}

impl OllamaProvider {
    pub fn new(service: Arc<InferenceService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl InferenceProvider for OllamaProvider {
    async fn generate(
        &self,
        request: &InferenceRequest,
        config: &ModelConfig,
        on_chunk: Option<&ChunkCallback>,
        cancel: &CancelToken,
    ) -> Result<String, SpecterError> {
        let context = request.context.as_deref();
        match (&request.modality, &request.content) {
            (Modality::Text, RequestContent::Text(question)) => self
                .service
                .ask_question(question, context, on_chunk, cancel)
                .await
                .map(|r| r.text),
            (Modality::Image | Modality::Multimodal, RequestContent::Images(paths)) => self
                .service
                .solve_from_screenshots(paths, context, cancel)
                .await
                .map(|r| r.text),
            (Modality::Audio, RequestContent::Audio(_)) => Ok(AUDIO_NOT_IMPLEMENTED.to_string()),
            (modality, _) => Err(SpecterError::Unsupported(format!(
                "content does not match the {modality} modality for model {}",
                config.name
            ))),
        }
    }
}

/// One modality-agnostic entry point over a registry of named model
/// configurations: resolves the config, checks the cache, wires streaming
/// observers, dispatches to the provider, caches the result, and fires the
/// session's single terminal callback.
pub struct UniversalRouter {
    models: RwLock<HashMap<String, ModelConfig>>,
    providers: HashMap<Provider, Arc<dyn InferenceProvider>>,
    sessions: SessionRegistry,
    cache: BoundedCache,
}

impl UniversalRouter {
    /// Build a router with the stock model registrations and the given
    /// Ollama handler. The other provider variants stay unimplemented and
    /// dispatch to `SpecterError::Unsupported`.
    pub fn new(ollama: Arc<dyn InferenceProvider>) -> Self {
        let mut models = HashMap::new();
        for config in default_models() {
            models.insert(config.name.clone(), config);
        }

        let mut providers: HashMap<Provider, Arc<dyn InferenceProvider>> = HashMap::new();
        providers.insert(Provider::Ollama, ollama);

        Self {
            models: RwLock::new(models),
            providers,
            sessions: SessionRegistry::new(),
            cache: BoundedCache::new(ROUTER_CACHE_CAPACITY),
        }
    }

    pub fn with_provider(
        mut self,
        provider: Provider,
        handler: Arc<dyn InferenceProvider>,
    ) -> Self {
        self.providers.insert(provider, handler);
        self
    }

    pub async fn register_model(&self, config: ModelConfig) {
        self.models.write().await.insert(config.name.clone(), config);
    }

    pub async fn available_models(&self) -> Vec<ModelConfig> {
        self.models.read().await.values().cloned().collect()
    }

    pub async fn supports_modality(&self, model_name: &str, modality: Modality) -> bool {
        self.models
            .read()
            .await
            .get(model_name)
            .map(|config| config.supports(modality))
            .unwrap_or(false)
    }

    /// Register streaming observers for a request id ahead of dispatch.
    pub async fn register_session(
        &self,
        request_id: &str,
        callbacks: StreamingCallbacks,
    ) -> Result<(), SpecterError> {
        self.sessions.register(request_id, callbacks).await
    }

    /// Dispatch a request against its target model. When `request_id`
    /// names a registered session, partial text flows through `on_chunk`
    /// and exactly one of `on_complete`/`on_error` fires before the
    /// session is deleted.
    pub async fn dispatch(
        &self,
        request: &InferenceRequest,
        request_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<GenerationResponse, SpecterError> {
        match self.dispatch_inner(request, request_id, cancel).await {
            Ok(response) => {
                if let Some(session) = self.terminal_session(request_id).await {
                    if let Some(on_complete) = session.on_complete {
                        on_complete(&response.text);
                    }
                }
                Ok(response)
            }
            Err(e) => {
                if let Some(session) = self.terminal_session(request_id).await {
                    if let Some(on_error) = session.on_error {
                        on_error(&e.to_string());
                    }
                }
                Err(e)
            }
        }
    }

    async fn terminal_session(&self, request_id: Option<&str>) -> Option<StreamingCallbacks> {
        match request_id {
            Some(id) => self.sessions.take(id).await,
            None => None,
        }
    }

    async fn dispatch_inner(
        &self,
        request: &InferenceRequest,
        request_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<GenerationResponse, SpecterError> {
        let started = Instant::now();

        let config = self
            .models
            .read()
            .await
            .get(&request.target_model)
            .cloned()
            .ok_or_else(|| {
                SpecterError::Configuration(format!(
                    "model {} not registered",
                    request.target_model
                ))
            })?;

        let key = response_cache_key(
            &config.name,
            request.modality,
            &request.content,
            request.context.as_deref(),
        );

        if let Some(text) = self.cache.get(&key).await {
            tracing::debug!(model = %config.name, modality = %request.modality, "cache hit");
            return Ok(self.build_response(text, &config, request.modality, started, true));
        }

        let provider = self.providers.get(&config.provider).ok_or_else(|| {
            SpecterError::Unsupported(format!("provider {} not implemented", config.provider))
        })?;

        let on_chunk = match request_id {
            Some(id) => self.sessions.peek(id).await.and_then(|s| s.on_chunk),
            None => None,
        };

        tracing::debug!(model = %config.name, modality = %request.modality, "dispatching");
        let text = provider
            .generate(request, &config, on_chunk.as_ref(), cancel)
            .await?;

        self.cache.put(key, &text).await;
        Ok(self.build_response(text, &config, request.modality, started, false))
    }

    fn build_response(
        &self,
        text: String,
        config: &ModelConfig,
        modality: Modality,
        started: Instant,
        cached: bool,
    ) -> GenerationResponse {
        GenerationResponse {
            text,
            timestamp_ms: now_millis(),
            metadata: ResponseMetadata {
                model: config.name.clone(),
                provider: config.provider,
                processing_time_ms: started.elapsed().as_millis() as u64,
                modality,
                cached,
            },
        }
    }
}

fn default_models() -> Vec<ModelConfig> {
    vec![
        ModelConfig::new(
            "llama3.2-vision",
            Modality::Image,
            Provider::Ollama,
            "llama3.2-vision",
        ),
        ModelConfig::new("llama3.2", Modality::Text, Provider::Ollama, "llama3.2"),
        ModelConfig::new("whisper", Modality::Audio, Provider::Ollama, "whisper")
            .with_temperature(0.1),
    ]
}
