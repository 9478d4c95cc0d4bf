use std::path::PathBuf;
use std::sync::Arc;

use specter_core::{
    CancelToken, GenerationResponse, InferenceRequest, Modality, ModelConfig, ProcessingStatus,
    Provider, SpecterConfig, SpecterError, StreamingCallbacks,
};
use specter_ollama::{HttpBackend, OllamaClient, ProviderBackend, StreamTiming};
use specter_router::{OllamaProvider, UniversalRouter};
use specter_service::{InferenceService, ModelCatalog};

/// Explicit per-process context: owns the transport, catalog, service, and
/// router, replacing module-level singletons. Construct once at startup and
/// share by reference (or `Arc`) with everything that dispatches requests.
pub struct Specter {
    config: SpecterConfig,
    catalog: Arc<ModelCatalog>,
    service: Arc<InferenceService>,
    router: UniversalRouter,
}

/// Assembles a [`Specter`] context, with injection points for tests.
pub struct SpecterBuilder {
    config: SpecterConfig,
    backend: Option<Arc<dyn ProviderBackend>>,
    timing: Option<StreamTiming>,
    status: Option<Box<dyn Fn(&ProcessingStatus) + Send + Sync>>,
}

impl SpecterBuilder {
    pub fn new(config: SpecterConfig) -> Self {
        Self {
            config,
            backend: None,
            timing: None,
            status: None,
        }
    }

    /// Swap the HTTP backend, e.g. for a `FakeBackend` in tests.
    pub fn backend(mut self, backend: Arc<dyn ProviderBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Override the assembler timers (tests shrink them to milliseconds).
    pub fn timing(mut self, timing: StreamTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Observe pipeline status updates.
    pub fn status_callback(
        mut self,
        f: impl Fn(&ProcessingStatus) + Send + Sync + 'static,
    ) -> Self {
        self.status = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Specter {
        let config = self.config;
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(HttpBackend::new()));

        let mut client = OllamaClient::new(config.host.clone(), backend);
        if let Some(timing) = self.timing {
            client = client.with_timing(timing);
        }
        let client = Arc::new(client);

        let catalog = Arc::new(ModelCatalog::new(client.clone()));

        let mut service = InferenceService::new(client, catalog.clone(), config.clone());
        if let Some(status) = self.status {
            service = service.with_status_callback(move |s| status(s));
        }
        let service = Arc::new(service);

        let router = UniversalRouter::new(Arc::new(OllamaProvider::new(service.clone())));

        Specter {
            config,
            catalog,
            service,
            router,
        }
    }
}

impl Specter {
    pub fn builder(config: SpecterConfig) -> SpecterBuilder {
        SpecterBuilder::new(config)
    }

    pub fn new(config: SpecterConfig) -> Self {
        Self::builder(config).build()
    }

    /// Build from `OLLAMA_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(SpecterConfig::from_env())
    }

    pub fn config(&self) -> &SpecterConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<InferenceService> {
        &self.service
    }

    pub fn router(&self) -> &UniversalRouter {
        &self.router
    }

    /// Ensure the configured text and vision models are registered with the
    /// router under the configured temperature. Called once after
    /// construction when the config names models outside the stock set.
    pub async fn register_configured_models(&self) {
        let text = ModelConfig::new(
            &self.config.text_model,
            Modality::Text,
            Provider::Ollama,
            &self.config.text_model,
        )
        .with_temperature(self.config.temperature);
        let vision = ModelConfig::new(
            &self.config.vision_model,
            Modality::Image,
            Provider::Ollama,
            &self.config.vision_model,
        )
        .with_temperature(self.config.temperature);

        self.router.register_model(vision).await;
        self.router.register_model(text).await;
    }

    // -- Inbound dispatch interface -----------------------------------------

    /// Answer a short text question through the router (cache, sessions,
    /// provider dispatch all apply).
    pub async fn ask_question(
        &self,
        question: &str,
        context: Option<&str>,
        request_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<GenerationResponse, SpecterError> {
        let mut request = InferenceRequest::text(question, &self.config.text_model);
        if let Some(context) = context {
            request = request.with_context(context);
        }
        self.router.dispatch(&request, request_id, cancel).await
    }

    /// Run the two-stage screenshot pipeline.
    pub async fn process_images(
        &self,
        paths: Vec<PathBuf>,
        context: Option<&str>,
        request_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<GenerationResponse, SpecterError> {
        let mut request = InferenceRequest::images(paths, &self.config.vision_model);
        if let Some(context) = context {
            request = request.with_context(context);
        }
        self.router.dispatch(&request, request_id, cancel).await
    }

    /// Audio transcription placeholder; resolves without network traffic.
    pub async fn process_audio(
        &self,
        payload: Vec<u8>,
        request_id: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<GenerationResponse, SpecterError> {
        let request = InferenceRequest::audio(payload, "whisper");
        self.router.dispatch(&request, request_id, cancel).await
    }

    /// Register streaming observers for a request id ahead of dispatch.
    pub async fn register_session(
        &self,
        request_id: &str,
        callbacks: StreamingCallbacks,
    ) -> Result<(), SpecterError> {
        self.router.register_session(request_id, callbacks).await
    }

    pub async fn available_models(&self) -> Vec<ModelConfig> {
        self.router.available_models().await
    }

    pub async fn check_connection(&self) -> bool {
        self.catalog.check_connection().await
    }
}
