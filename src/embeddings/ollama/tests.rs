use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, batch_size: u32) -> OllamaConfig {
    OllamaConfig {
        protocol: "http".to_string(),
        host: "127.0.0.1".to_string(),
        port: server.address().port(),
        model: "all-minilm".to_string(),
        batch_size,
        embedding_dimension: 3,
    }
}

fn client_for(server: &MockServer, batch_size: u32) -> OllamaClient {
    OllamaClient::new(&config_for(server, batch_size))
        .expect("client should build")
        .with_retry_attempts(1)
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        batch_size: 128,
        embedding_dimension: 384,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model, "test-model");
    assert_eq!(client.model_name(), "test-model");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.retry_attempts, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn embeds_in_batches_preserving_order() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["a", "b"]})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"embeddings": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(json!({"input": ["c"]})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.0, 0.0, 1.0]]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 2);
    let vectors = tokio::task::spawn_blocking(move || {
        client.embed_batch(&["a".to_string(), "b".to_string(), "c".to_string()])
    })
    .await
    .expect("task should join")
    .expect("embedding should succeed");

    assert_eq!(
        vectors,
        vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0]
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn response_count_mismatch_is_an_embedding_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[1.0, 0.0, 0.0]]})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    let result = tokio::task::spawn_blocking(move || {
        client.embed_batch(&["a".to_string(), "b".to_string()])
    })
    .await
    .expect("task should join");

    match result {
        Err(ThinkbookError::Embedding(message)) => assert!(message.contains("Mismatch")),
        other => panic!("expected embedding error, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_is_an_embedding_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    let result = tokio::task::spawn_blocking(move || client.embed_one("query"))
        .await
        .expect("task should join");

    assert!(matches!(result, Err(ThinkbookError::Embedding(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_input_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    let vectors = tokio::task::spawn_blocking(move || client.embed_batch(&[]))
        .await
        .expect("task should join")
        .expect("empty batch should succeed");

    assert!(vectors.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_accepts_latest_tag() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "all-minilm:latest", "size": 45_000_000, "digest": "abc"}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("task should join")
        .expect("health check should pass");
}

#[tokio::test(flavor = "multi_thread")]
async fn health_check_fails_for_missing_model() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "nomic-embed-text:latest"}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, 8);
    let result = tokio::task::spawn_blocking(move || client.health_check())
        .await
        .expect("task should join");

    assert!(result.is_err());
}
