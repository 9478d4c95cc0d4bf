use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Modality & Provider
// ---------------------------------------------------------------------------

/// Input modality of an inference request or a registered model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Multimodal,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::Audio => "audio",
            Modality::Multimodal => "multimodal",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of inference providers a model config can point at.
///
/// Only `Ollama` is implemented; the others dispatch to
/// `SpecterError::Unsupported` rather than being silently absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
            Provider::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// InferenceRequest
// ---------------------------------------------------------------------------

/// The payload of a request, one variant per modality family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestContent {
    /// A plain-text question or instruction.
    Text(String),
    /// Ordered screenshot paths, analyzed in sequence.
    Images(Vec<PathBuf>),
    /// Opaque audio payload; transcription is not implemented yet.
    Audio(Vec<u8>),
}

/// An inference request. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub modality: Modality,
    pub content: RequestContent,
    pub context: Option<String>,
    pub target_model: String,
}

impl InferenceRequest {
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            modality: Modality::Text,
            content: RequestContent::Text(content.into()),
            context: None,
            target_model: model.into(),
        }
    }

    pub fn images(paths: Vec<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            modality: Modality::Image,
            content: RequestContent::Images(paths),
            context: None,
            target_model: model.into(),
        }
    }

    pub fn audio(payload: Vec<u8>, model: impl Into<String>) -> Self {
        Self {
            modality: Modality::Audio,
            content: RequestContent::Audio(payload),
            context: None,
            target_model: model.into(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = modality;
        self
    }
}

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

/// A named model registration: which provider serves it, which underlying
/// model identifier to send, and the sampling defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub modality: Modality,
    pub provider: Provider,
    pub model: String,
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ModelConfig {
    pub fn new(
        name: impl Into<String>,
        modality: Modality,
        provider: Provider,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            modality,
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Whether this model accepts the given request modality.
    /// Multimodal models accept everything.
    pub fn supports(&self, modality: Modality) -> bool {
        self.modality == modality || self.modality == Modality::Multimodal
    }
}

// ---------------------------------------------------------------------------
// GenerationResponse
// ---------------------------------------------------------------------------

/// Metadata attached to every generation result, cached or fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub model: String,
    pub provider: Provider,
    pub processing_time_ms: u64,
    pub modality: Modality,
    pub cached: bool,
}

/// The terminal result of a dispatched request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub timestamp_ms: u64,
    pub metadata: ResponseMetadata,
}

/// Milliseconds since the Unix epoch, for response timestamps.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// ProcessingStatus
// ---------------------------------------------------------------------------

/// Pipeline stage labels for status callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    AnalyzingImages,
    ExtractingText,
    GeneratingSolution,
    Finalizing,
    Complete,
    Error,
}

/// Observational progress report. Emitted through a callback, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub stage: Stage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl ProcessingStatus {
    pub fn new(stage: Stage, message: impl Into<String>, progress: Option<u8>) -> Self {
        Self {
            stage,
            message: message.into(),
            progress,
        }
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Cumulative partial-text observer. Always receives the whole answer so
/// far, never a raw delta.
pub type ChunkCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Progress observer (0-100).
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Terminal success observer, receiving the final text.
pub type CompleteCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Terminal failure observer, receiving the error message.
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Pipeline status observer.
pub type StatusCallback = Arc<dyn Fn(&ProcessingStatus) + Send + Sync>;

/// Per-request streaming observers. A request that was dispatched sees
/// exactly one terminal callback: `on_complete` or `on_error`, never both.
#[derive(Clone, Default)]
pub struct StreamingCallbacks {
    pub on_chunk: Option<ChunkCallback>,
    pub on_progress: Option<ProgressCallback>,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl StreamingCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_chunk(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_chunk = Some(Arc::new(f));
        self
    }

    pub fn on_progress(mut self, f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cloneable cancellation handle threaded through transport calls.
///
/// Cancelling resolves the in-flight request with `SpecterError::Cancelled`.
/// A default token is never cancelled.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` has been called. Never resolves for a token
    /// that is never cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_TEXT_MODEL: &str = "llama3.2-vision";
pub const DEFAULT_VISION_MODEL: &str = "llama3.2-vision";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Runtime configuration, sourced from the environment with documented
/// defaults. `max_tokens` of 0 means unlimited.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecterConfig {
    pub host: String,
    pub text_model: String,
    pub vision_model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for SpecterConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: 0,
        }
    }
}

impl SpecterConfig {
    /// Read `OLLAMA_HOST`, `OLLAMA_MODEL`, `OLLAMA_VISION_MODEL`,
    /// `OLLAMA_TEMPERATURE`, and `OLLAMA_MAX_TOKENS`, falling back to the
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("OLLAMA_HOST").unwrap_or(defaults.host),
            text_model: std::env::var("OLLAMA_MODEL").unwrap_or(defaults.text_model),
            vision_model: std::env::var("OLLAMA_VISION_MODEL").unwrap_or(defaults.vision_model),
            temperature: std::env::var("OLLAMA_TEMPERATURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.temperature),
            max_tokens: std::env::var("OLLAMA_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_tokens),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_text_model(mut self, model: impl Into<String>) -> Self {
        self.text_model = model.into();
        self
    }

    pub fn with_vision_model(mut self, model: impl Into<String>) -> Self {
        self.vision_model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// `num_predict` to send on the wire: `None` when unlimited.
    pub fn num_predict(&self) -> Option<u32> {
        (self.max_tokens > 0).then_some(self.max_tokens)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for the Specter inference core.
#[derive(Debug, Error)]
pub enum SpecterError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("model pull failed: {0}")]
    ModelPull(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("streaming session already active for request {0}")]
    SessionActive(String),
    #[error("request cancelled")]
    Cancelled,
}
