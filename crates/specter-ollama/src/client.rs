use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use specter_core::{CancelToken, ChunkCallback, SpecterError};
use tokio::time::{sleep_until, Instant};

use crate::assembler::{assemble_stream, StreamTiming};
use crate::backend::{ProviderBackend, ProviderRequest};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One entry from `GET /api/tags`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub modified_at: String,
}

#[derive(Debug, Deserialize)]
struct ListModelsResponse {
    models: Vec<ModelInfo>,
}

/// Sampling options forwarded in the generate body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

/// Body of `POST /api/generate`. Images are base64-encoded payloads,
/// already prepared by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<GenerateOptions>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            images: None,
            options: None,
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = Some(images);
        self
    }

    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = Some(options);
        self
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for the three remote operations the rest of the system
/// needs: model listing, model pull, and chunked generation.
pub struct OllamaClient {
    backend: Arc<dyn ProviderBackend>,
    base_url: String,
    timing: StreamTiming,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, backend: Arc<dyn ProviderBackend>) -> Self {
        Self {
            backend,
            base_url: base_url.into(),
            timing: StreamTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: StreamTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List the models currently available on the server.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, SpecterError> {
        let request = ProviderRequest::get(format!("{}/api/tags", self.base_url));
        let response = self.backend.send(request).await?;

        if response.status >= 400 {
            return Err(SpecterError::Connection(format!(
                "model listing failed with status {}",
                response.status
            )));
        }

        let parsed: ListModelsResponse = serde_json::from_str(&response.body)
            .map_err(|e| SpecterError::Connection(format!("unparseable model list: {e}")))?;
        Ok(parsed.models)
    }

    /// Ask the server to download a model. Blocks until the server
    /// responds; the response body carries no information we need.
    pub async fn pull_model(&self, name: &str) -> Result<(), SpecterError> {
        let request = ProviderRequest::post(
            format!("{}/api/pull", self.base_url),
            json!({ "model": name }),
        );
        let response = self.backend.send(request).await?;

        if response.status >= 400 {
            return Err(SpecterError::ModelPull(format!(
                "server returned status {} pulling {name}",
                response.status
            )));
        }
        Ok(())
    }

    /// Run a generation request and assemble the chunked NDJSON reply into
    /// the final text. `on_partial` observes the cumulative answer after
    /// every line that extends it.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        on_partial: Option<&ChunkCallback>,
        cancel: &CancelToken,
    ) -> Result<String, SpecterError> {
        let started = Instant::now();
        let deadline = started + self.timing.ceiling;

        let body = serde_json::to_value(request)
            .map_err(|e| SpecterError::Protocol(format!("failed to encode request: {e}")))?;
        let provider_request =
            ProviderRequest::post(format!("{}/api/generate", self.base_url), body);

        tracing::debug!(model = %request.model, prompt_len = request.prompt.len(), "starting generation");

        let connect = self.backend.send_stream(provider_request);
        tokio::pin!(connect);

        // The ceiling covers connection establishment too, not just the
        // streaming phase.
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(SpecterError::Cancelled),
            _ = sleep_until(deadline) => {
                return Err(SpecterError::Timeout(
                    "generation did not finish within the request ceiling".to_string(),
                ));
            }
            result = &mut connect => result?,
        };

        assemble_stream(stream, &self.timing, started, on_partial, cancel).await
    }
}
