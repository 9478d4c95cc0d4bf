use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use specter_cache::{response_cache_key, BoundedCache, SERVICE_CACHE_CAPACITY};
use specter_core::{
    now_millis, CancelToken, ChunkCallback, GenerationResponse, Modality, ProcessingStatus,
    Provider, RequestContent, ResponseMetadata, SpecterConfig, SpecterError, Stage,
    StatusCallback,
};
use specter_ollama::{GenerateOptions, GenerateRequest, OllamaClient};

use crate::catalog::ModelCatalog;
use crate::prompts::{short_answer_prompt, solution_prompt, SCREENSHOT_ANALYSIS_PROMPT};

/// Temperature for the short-answer path, lower than the configured
/// default for more deterministic replies.
const SHORT_ANSWER_TEMPERATURE: f64 = 0.3;

/// Token budget for the short-answer path, sized for 3-4 lines.
const SHORT_ANSWER_NUM_PREDICT: u32 = 100;

/// Orchestrates the two-stage screenshot pipeline and the low-latency
/// short-question path against a single model server.
pub struct InferenceService {
    client: Arc<OllamaClient>,
    catalog: Arc<ModelCatalog>,
    cache: BoundedCache,
    config: SpecterConfig,
    status: Option<StatusCallback>,
}

impl InferenceService {
    pub fn new(
        client: Arc<OllamaClient>,
        catalog: Arc<ModelCatalog>,
        config: SpecterConfig,
    ) -> Self {
        Self {
            client,
            catalog,
            cache: BoundedCache::new(SERVICE_CACHE_CAPACITY),
            config,
            status: None,
        }
    }

    pub fn with_status_callback(
        mut self,
        f: impl Fn(&ProcessingStatus) + Send + Sync + 'static,
    ) -> Self {
        self.status = Some(Arc::new(f));
        self
    }

    pub fn config(&self) -> &SpecterConfig {
        &self.config
    }

    fn update_status(&self, stage: Stage, message: impl Into<String>, progress: Option<u8>) {
        if let Some(ref status) = self.status {
            status(&ProcessingStatus::new(stage, message, progress));
        }
    }

    async fn require_connection(&self) -> Result<(), SpecterError> {
        if self.catalog.check_connection().await {
            Ok(())
        } else {
            Err(SpecterError::Connection(format!(
                "cannot reach the inference server at {}",
                self.client.base_url()
            )))
        }
    }

    fn response(
        &self,
        text: String,
        model: impl Into<String>,
        modality: Modality,
        started: Instant,
        cached: bool,
    ) -> GenerationResponse {
        GenerationResponse {
            text,
            timestamp_ms: now_millis(),
            metadata: ResponseMetadata {
                model: model.into(),
                provider: Provider::Ollama,
                processing_time_ms: started.elapsed().as_millis() as u64,
                modality,
                cached,
            },
        }
    }

    // -- Short question path -------------------------------------------------

    /// Answer a short text question, streaming the cumulative reply through
    /// `on_chunk`. Served from cache when an identical question was answered
    /// within the last hour; a cache hit never touches the network and never
    /// invokes `on_chunk`.
    pub async fn ask_question(
        &self,
        question: &str,
        context: Option<&str>,
        on_chunk: Option<&ChunkCallback>,
        cancel: &CancelToken,
    ) -> Result<GenerationResponse, SpecterError> {
        match self.ask_question_inner(question, context, on_chunk, cancel).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.update_status(Stage::Error, format!("Question processing failed: {e}"), None);
                Err(e)
            }
        }
    }

    async fn ask_question_inner(
        &self,
        question: &str,
        context: Option<&str>,
        on_chunk: Option<&ChunkCallback>,
        cancel: &CancelToken,
    ) -> Result<GenerationResponse, SpecterError> {
        let started = Instant::now();
        let key = response_cache_key(
            &self.config.text_model,
            Modality::Text,
            &RequestContent::Text(question.to_string()),
            context,
        );

        if let Some(text) = self.cache.get(&key).await {
            self.update_status(Stage::Complete, "Retrieved from cache", Some(100));
            return Ok(self.response(text, &self.config.text_model, Modality::Text, started, true));
        }

        self.update_status(Stage::Initializing, "Processing question...", Some(20));
        self.require_connection().await?;

        // Failures are swallowed here; the generate call below fails with a
        // more specific error if the model is genuinely unavailable.
        self.catalog
            .ensure_model_exists(&self.config.text_model, self.status.as_ref())
            .await;

        self.update_status(Stage::GeneratingSolution, "Generating response...", Some(60));

        let request = GenerateRequest::new(
            &self.config.text_model,
            short_answer_prompt(question, context),
        )
        .with_options(GenerateOptions {
            temperature: Some(SHORT_ANSWER_TEMPERATURE),
            num_predict: Some(SHORT_ANSWER_NUM_PREDICT),
        });

        let text = self.client.generate(&request, on_chunk, cancel).await?;
        self.update_status(Stage::Complete, "Response generated", Some(100));

        self.cache.put(key, &text).await;
        Ok(self.response(text, &self.config.text_model, Modality::Text, started, false))
    }

    // -- Screenshot pipeline -------------------------------------------------

    /// Stage 1 alone: structured extraction from the given screenshots.
    pub async fn analyze_screenshots(
        &self,
        image_paths: &[impl AsRef<Path>],
        cancel: &CancelToken,
    ) -> Result<GenerationResponse, SpecterError> {
        let started = Instant::now();
        match self.run_analysis(image_paths, cancel).await {
            Ok(text) => {
                self.update_status(Stage::Complete, "Image analysis completed", Some(100));
                Ok(self.response(text, &self.config.vision_model, Modality::Image, started, false))
            }
            Err(e) => {
                self.update_status(Stage::Error, format!("Analysis failed: {e}"), None);
                Err(e)
            }
        }
    }

    /// Stage 2 alone: turn an analysis text into a structured solution.
    pub async fn generate_solution(
        &self,
        analysis: &str,
        additional_context: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<GenerationResponse, SpecterError> {
        let started = Instant::now();
        match self.run_solution(analysis, additional_context, cancel).await {
            Ok(text) => {
                self.update_status(Stage::Complete, "Solution generated successfully", Some(100));
                Ok(self.response(text, &self.config.text_model, Modality::Text, started, false))
            }
            Err(e) => {
                self.update_status(Stage::Error, format!("Solution generation failed: {e}"), None);
                Err(e)
            }
        }
    }

    /// Full pipeline: analyze every screenshot, then solve from the
    /// analysis, concatenating both stages into one formatted document.
    /// No partial pipeline result is cached on failure.
    pub async fn solve_from_screenshots(
        &self,
        image_paths: &[impl AsRef<Path>],
        additional_context: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<GenerationResponse, SpecterError> {
        let started = Instant::now();
        match self
            .solve_from_screenshots_inner(image_paths, additional_context, started, cancel)
            .await
        {
            Ok(response) => Ok(response),
            Err(e) => {
                self.update_status(Stage::Error, format!("Problem processing failed: {e}"), None);
                Err(e)
            }
        }
    }

    async fn solve_from_screenshots_inner(
        &self,
        image_paths: &[impl AsRef<Path>],
        additional_context: Option<&str>,
        started: Instant,
        cancel: &CancelToken,
    ) -> Result<GenerationResponse, SpecterError> {
        self.update_status(Stage::Initializing, "Starting problem analysis...", Some(5));

        let analysis = self.run_analysis(image_paths, cancel).await?;
        let solution = self.run_solution(&analysis, additional_context, cancel).await?;

        self.update_status(Stage::Finalizing, "Finalizing response...", Some(95));

        let elapsed_ms = started.elapsed().as_millis();
        let combined = format!(
            "# Problem Analysis & Solution\n\n\
             ## Screenshot Analysis\n{analysis}\n\n\
             ---\n\n\
             ## Complete Solution\n{solution}\n\n\
             ---\n\n\
             *Analysis completed in {elapsed_ms}ms using {} + {}*",
            self.config.vision_model, self.config.text_model,
        );

        self.update_status(Stage::Complete, "Problem processed successfully", Some(100));

        let model = format!("{} + {}", self.config.vision_model, self.config.text_model);
        Ok(self.response(combined, model, Modality::Multimodal, started, false))
    }

    async fn run_analysis(
        &self,
        image_paths: &[impl AsRef<Path>],
        cancel: &CancelToken,
    ) -> Result<String, SpecterError> {
        self.update_status(Stage::Initializing, "Preparing image analysis...", Some(10));
        self.require_connection().await?;

        self.update_status(Stage::Initializing, "Checking vision model...", Some(20));
        self.catalog
            .ensure_model_exists(&self.config.vision_model, self.status.as_ref())
            .await;

        self.update_status(
            Stage::AnalyzingImages,
            format!("Analyzing {} screenshot(s)...", image_paths.len()),
            Some(30),
        );

        let mut images = Vec::with_capacity(image_paths.len());
        for path in image_paths {
            images.push(encode_image(path.as_ref()).await?);
        }

        self.update_status(Stage::AnalyzingImages, "Processing with vision model...", Some(60));

        let request = GenerateRequest::new(&self.config.vision_model, SCREENSHOT_ANALYSIS_PROMPT)
            .with_images(images)
            .with_options(GenerateOptions {
                temperature: Some(self.config.temperature),
                num_predict: self.config.num_predict(),
            });

        self.client.generate(&request, None, cancel).await
    }

    async fn run_solution(
        &self,
        analysis: &str,
        additional_context: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<String, SpecterError> {
        self.update_status(
            Stage::GeneratingSolution,
            "Generating comprehensive solution...",
            Some(70),
        );

        self.catalog
            .ensure_model_exists(&self.config.text_model, self.status.as_ref())
            .await;

        self.update_status(
            Stage::GeneratingSolution,
            "Processing with language model...",
            Some(85),
        );

        let request = GenerateRequest::new(
            &self.config.text_model,
            solution_prompt(analysis, additional_context),
        )
        .with_options(GenerateOptions {
            temperature: Some(self.config.temperature),
            num_predict: self.config.num_predict(),
        });

        self.client.generate(&request, None, cancel).await
    }
}

/// Base64-encode one screenshot, failing the whole request when the path
/// does not exist.
async fn encode_image(path: &Path) -> Result<String, SpecterError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        SpecterError::FileNotFound(format!("screenshot not found: {}: {e}", path.display()))
    })?;
    Ok(BASE64.encode(bytes))
}
