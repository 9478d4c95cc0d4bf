use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use specter_core::{CancelToken, ChunkCallback, SpecterError};
use specter_ollama::{
    FakeBackend, GenerateOptions, GenerateRequest, HttpMethod, OllamaClient, StreamTiming,
};

fn setup(backend: Arc<FakeBackend>) -> OllamaClient {
    OllamaClient::new("http://localhost:11434", backend).with_timing(StreamTiming {
        idle: Duration::from_millis(50),
        grace: Duration::from_millis(75),
        ceiling: Duration::from_secs(5),
    })
}

#[tokio::test]
async fn list_models_parses_tags_response() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_json(
        200,
        json!({
            "models": [
                {"name": "llama3.2:latest", "size": 2019393189u64, "digest": "a80c4f17acd5", "modified_at": "2024-11-12T09:00:00Z"},
                {"name": "llama3.2-vision:latest"}
            ]
        }),
    );

    let client = setup(backend.clone());
    let models = client.list_models().await.unwrap();

    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name, "llama3.2:latest");
    assert_eq!(models[0].size, 2019393189);
    assert_eq!(models[1].digest, "");

    let requests = backend.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, HttpMethod::Get);
    assert!(requests[0].url.ends_with("/api/tags"));
}

#[tokio::test]
async fn list_models_rejects_error_status() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_json(500, json!({"error": "boom"}));

    let client = setup(backend);
    let err = client.list_models().await.unwrap_err();
    assert!(matches!(err, SpecterError::Connection(_)));
}

#[tokio::test]
async fn list_models_rejects_unparseable_body() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_response(specter_ollama::ProviderResponse {
        status: 200,
        body: "<html>not json</html>".to_string(),
    });

    let client = setup(backend);
    let err = client.list_models().await.unwrap_err();
    assert!(matches!(err, SpecterError::Connection(_)));
}

#[tokio::test]
async fn pull_model_posts_the_model_name() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_json(200, json!({"status": "success"}));

    let client = setup(backend.clone());
    client.pull_model("llama3.2").await.unwrap();

    let requests = backend.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, HttpMethod::Post);
    assert!(requests[0].url.ends_with("/api/pull"));
    assert_eq!(requests[0].body.as_ref().unwrap()["model"], "llama3.2");
}

#[tokio::test]
async fn pull_model_surfaces_server_failure() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_json(500, json!({"error": "no space"}));

    let client = setup(backend);
    let err = client.pull_model("llama3.2").await.unwrap_err();
    assert!(matches!(err, SpecterError::ModelPull(_)));
}

#[tokio::test]
async fn generate_streams_cumulative_partials() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_stream_chunks(vec![bytes::Bytes::from(
        "{\"response\":\"a\",\"done\":false}\n{\"response\":\"b\",\"done\":true}\n",
    )]);

    let client = setup(backend);
    let partials: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = partials.clone();
    let on_partial: ChunkCallback = Arc::new(move |text: &str| {
        sink.lock().unwrap().push(text.to_string());
    });

    let request = GenerateRequest::new("llama3.2", "hi");
    let text = client
        .generate(&request, Some(&on_partial), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(text, "ab");
    // Callers always observe the whole answer so far, never a raw delta.
    assert_eq!(*partials.lock().unwrap(), vec!["a".to_string(), "ab".to_string()]);
}

#[tokio::test]
async fn generate_reassembles_lines_split_across_chunks() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_stream_chunks(vec![
        bytes::Bytes::from("{\"resp"),
        bytes::Bytes::from("onse\":\"x\",\"done\":true}\n"),
    ]);

    let client = setup(backend);
    let request = GenerateRequest::new("llama3.2", "hi");
    let text = client
        .generate(&request, None, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(text, "x");
}

#[tokio::test]
async fn generate_resolves_on_end_of_input_without_done() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_stream_chunks(vec![bytes::Bytes::from(
        "{\"response\":\"hello \"}\n{\"response\":\"world\"}",
    )]);

    let client = setup(backend);
    let request = GenerateRequest::new("llama3.2", "hi");
    let text = client
        .generate(&request, None, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(text, "hello world");
}

#[tokio::test]
async fn generate_skips_malformed_lines() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_stream_chunks(vec![bytes::Bytes::from(
        "{\"response\":\"ok\"}\nnot json at all\n{\"response\":\"!\",\"done\":true}\n",
    )]);

    let client = setup(backend);
    let request = GenerateRequest::new("llama3.2", "hi");
    let text = client
        .generate(&request, None, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(text, "ok!");
}

#[tokio::test]
async fn generate_rejects_empty_stream() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_stream_chunks(vec![]);

    let client = setup(backend);
    let request = GenerateRequest::new("llama3.2", "hi");
    let err = client
        .generate(&request, None, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SpecterError::Protocol(_)));
}

#[tokio::test]
async fn generate_sends_images_and_options() {
    let backend = Arc::new(FakeBackend::new());
    backend.push_stream_chunks(vec![bytes::Bytes::from(
        "{\"response\":\"seen\",\"done\":true}\n",
    )]);

    let client = setup(backend.clone());
    let request = GenerateRequest::new("llama3.2-vision", "describe")
        .with_images(vec!["aGVsbG8=".to_string()])
        .with_options(GenerateOptions {
            temperature: Some(0.3),
            num_predict: Some(100),
        });
    client
        .generate(&request, None, &CancelToken::new())
        .await
        .unwrap();

    let requests = backend.requests().await;
    assert_eq!(requests.len(), 1);
    let body = requests[0].body.as_ref().unwrap();
    assert!(requests[0].url.ends_with("/api/generate"));
    assert_eq!(body["model"], "llama3.2-vision");
    assert_eq!(body["images"][0], "aGVsbG8=");
    assert_eq!(body["options"]["temperature"], 0.3);
    assert_eq!(body["options"]["num_predict"], 100);
}
