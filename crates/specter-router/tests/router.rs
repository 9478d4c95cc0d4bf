use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use specter_core::{
    CancelToken, ChunkCallback, InferenceRequest, Modality, ModelConfig, Provider, SpecterError,
    StreamingCallbacks,
};
use specter_router::{InferenceProvider, UniversalRouter};

/// Provider that replies with a fixed text, optionally streaming two
/// cumulative partials first, and counts its invocations.
struct ScriptedProvider {
    reply: Result<String, String>,
    calls: Arc<Mutex<usize>>,
}

impl ScriptedProvider {
    fn ok(reply: &str) -> (Self, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        (
            Self {
                reply: Ok(reply.to_string()),
                calls: calls.clone(),
            },
            calls,
        )
    }

    fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            calls: Arc::new(Mutex::new(0)),
        }
    }
}

#[async_trait]
impl InferenceProvider for ScriptedProvider {
    async fn generate(
        &self,
        _request: &InferenceRequest,
        _config: &ModelConfig,
        on_chunk: Option<&ChunkCallback>,
        _cancel: &CancelToken,
    ) -> Result<String, SpecterError> {
        *self.calls.lock().unwrap() += 1;
        match &self.reply {
            Ok(text) => {
                if let Some(cb) = on_chunk {
                    let (head, _) = text.split_at(text.len() / 2);
                    cb(head);
                    cb(text);
                }
                Ok(text.clone())
            }
            Err(message) => Err(SpecterError::Protocol(message.clone())),
        }
    }
}

fn text_request(question: &str) -> InferenceRequest {
    InferenceRequest::text(question, "llama3.2")
}

#[tokio::test]
async fn dispatch_resolves_the_registered_model() {
    let (provider, _) = ScriptedProvider::ok("answer");
    let router = UniversalRouter::new(Arc::new(provider));

    let response = router
        .dispatch(&text_request("q"), None, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(response.text, "answer");
    assert_eq!(response.metadata.model, "llama3.2");
    assert_eq!(response.metadata.provider, Provider::Ollama);
    assert_eq!(response.metadata.modality, Modality::Text);
    assert!(!response.metadata.cached);
}

#[tokio::test]
async fn unknown_model_is_a_configuration_error() {
    let (provider, calls) = ScriptedProvider::ok("unused");
    let router = UniversalRouter::new(Arc::new(provider));

    let request = InferenceRequest::text("q", "gpt-oss");
    let err = router
        .dispatch(&request, None, &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SpecterError::Configuration(_)));
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn unimplemented_provider_is_unsupported() {
    let (provider, calls) = ScriptedProvider::ok("unused");
    let router = UniversalRouter::new(Arc::new(provider));
    router
        .register_model(ModelConfig::new(
            "claude",
            Modality::Text,
            Provider::Anthropic,
            "claude-3-haiku",
        ))
        .await;

    let err = router
        .dispatch(
            &InferenceRequest::text("q", "claude"),
            None,
            &CancelToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SpecterError::Unsupported(_)));
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[tokio::test]
async fn identical_dispatch_is_served_from_cache() {
    let (provider, calls) = ScriptedProvider::ok("cached answer");
    let router = UniversalRouter::new(Arc::new(provider));
    let cancel = CancelToken::new();

    let first = router
        .dispatch(&text_request("same q"), None, &cancel)
        .await
        .unwrap();
    let second = router
        .dispatch(&text_request("same q"), None, &cancel)
        .await
        .unwrap();

    assert!(!first.metadata.cached);
    assert!(second.metadata.cached);
    assert_eq!(first.text, second.text);
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test]
async fn different_context_misses_the_cache() {
    let (provider, calls) = ScriptedProvider::ok("answer");
    let router = UniversalRouter::new(Arc::new(provider));
    let cancel = CancelToken::new();

    router
        .dispatch(&text_request("q"), None, &cancel)
        .await
        .unwrap();
    router
        .dispatch(&text_request("q").with_context("new info"), None, &cancel)
        .await
        .unwrap();

    assert_eq!(*calls.lock().unwrap(), 2);
}

#[tokio::test]
async fn session_streams_then_fires_complete_exactly_once() {
    let (provider, _) = ScriptedProvider::ok("full answer");
    let router = UniversalRouter::new(Arc::new(provider));

    let chunks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let completes: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let (c, d, e) = (chunks.clone(), completes.clone(), errors.clone());
    let callbacks = StreamingCallbacks::new()
        .on_chunk(move |t| c.lock().unwrap().push(t.to_string()))
        .on_complete(move |t| d.lock().unwrap().push(t.to_string()))
        .on_error(move |t| e.lock().unwrap().push(t.to_string()));

    router.register_session("req-1", callbacks).await.unwrap();
    router
        .dispatch(&text_request("q"), Some("req-1"), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(
        *chunks.lock().unwrap(),
        vec!["full ".to_string(), "full answer".to_string()]
    );
    assert_eq!(*completes.lock().unwrap(), vec!["full answer".to_string()]);
    assert!(errors.lock().unwrap().is_empty());

    // The session was consumed; the id is free again.
    router
        .register_session("req-1", StreamingCallbacks::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn session_error_path_fires_on_error_exactly_once() {
    let router = UniversalRouter::new(Arc::new(ScriptedProvider::failing("upstream died")));

    let completes: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errors: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let (d, e) = (completes.clone(), errors.clone());
    let callbacks = StreamingCallbacks::new()
        .on_complete(move |t| d.lock().unwrap().push(t.to_string()))
        .on_error(move |t| e.lock().unwrap().push(t.to_string()));

    router.register_session("req-2", callbacks).await.unwrap();
    let err = router
        .dispatch(&text_request("q"), Some("req-2"), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SpecterError::Protocol(_)));
    assert!(completes.lock().unwrap().is_empty());
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("upstream died"));
}

#[tokio::test]
async fn active_session_rejects_reregistration() {
    let (provider, _) = ScriptedProvider::ok("unused");
    let router = UniversalRouter::new(Arc::new(provider));

    router
        .register_session("req-3", StreamingCallbacks::new())
        .await
        .unwrap();
    let err = router
        .register_session("req-3", StreamingCallbacks::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SpecterError::SessionActive(_)));
}

#[tokio::test]
async fn cache_hit_completes_the_session_without_streaming() {
    let (provider, calls) = ScriptedProvider::ok("warm answer");
    let router = UniversalRouter::new(Arc::new(provider));
    let cancel = CancelToken::new();

    router
        .dispatch(&text_request("warm q"), None, &cancel)
        .await
        .unwrap();

    let chunks: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let completes: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let (c, d) = (chunks.clone(), completes.clone());
    let callbacks = StreamingCallbacks::new()
        .on_chunk(move |t| c.lock().unwrap().push(t.to_string()))
        .on_complete(move |t| d.lock().unwrap().push(t.to_string()));

    router.register_session("req-4", callbacks).await.unwrap();
    let response = router
        .dispatch(&text_request("warm q"), Some("req-4"), &cancel)
        .await
        .unwrap();

    assert!(response.metadata.cached);
    assert_eq!(*calls.lock().unwrap(), 1);
    assert!(chunks.lock().unwrap().is_empty());
    assert_eq!(*completes.lock().unwrap(), vec!["warm answer".to_string()]);
}

#[tokio::test]
async fn stock_registrations_answer_capability_queries() {
    let (provider, _) = ScriptedProvider::ok("unused");
    let router = UniversalRouter::new(Arc::new(provider));

    let mut names: Vec<String> = router
        .available_models()
        .await
        .into_iter()
        .map(|m| m.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["llama3.2", "llama3.2-vision", "whisper"]);

    assert!(router.supports_modality("llama3.2", Modality::Text).await);
    assert!(!router.supports_modality("llama3.2", Modality::Image).await);
    assert!(
        router
            .supports_modality("llama3.2-vision", Modality::Image)
            .await
    );
    assert!(router.supports_modality("whisper", Modality::Audio).await);
    assert!(!router.supports_modality("unknown", Modality::Text).await);
}
