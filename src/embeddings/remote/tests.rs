use serde_json::json;
use serial_test::serial;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

use super::*;

fn client_for(server: &MockServer) -> RemoteEmbeddingClient {
    RemoteEmbeddingClient::new(&format!("{}/v1/embeddings", server.uri()), "test-model")
        .expect("endpoint should parse")
        .with_api_key("test-key")
        .with_backoff(Duration::from_millis(1))
}

#[test]
fn client_configuration() {
    let client = RemoteEmbeddingClient::new("https://api.example.com/v1/embeddings", "small")
        .expect("endpoint should parse")
        .with_retry_attempts(5);

    assert_eq!(client.model(), "small");
    assert_eq!(client.endpoint().host_str(), Some("api.example.com"));
    assert_eq!(client.retry_attempts, 5);
    assert_eq!(client.api_key, None);
    assert_eq!(
        RemoteEmbeddingClient::new("https://x.test", "m")
            .expect("endpoint should parse")
            .with_retry_attempts(0)
            .retry_attempts,
        1
    );
}

#[test]
fn invalid_endpoints_are_rejected() {
    assert!(matches!(
        RemoteEmbeddingClient::new("not a url", "m"),
        Err(EmbeddingError::InvalidEndpoint(_))
    ));
    assert!(matches!(
        RemoteEmbeddingClient::new("ftp://example.com/embed", "m"),
        Err(EmbeddingError::InvalidEndpoint(_))
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn embeds_with_bearer_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"input": "hello", "model": "test-model"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let vector = client.embed("hello").await.expect("should embed");
    assert_eq!(vector, vec![0.1, 0.2, 0.3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn batch_results_follow_response_index() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(json!({"input": ["a", "b"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"embedding": [2.0], "index": 1},
                {"embedding": [1.0], "index": 0}
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let vectors = client
        .embed_batch(&["a".to_string(), "b".to_string()])
        .await
        .expect("should embed");
    assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": [{"embedding": [1.0, 0.0]}]})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).with_retry_attempts(3);
    let vector = client.embed("retry me").await.expect("should succeed on third attempt");
    assert_eq!(vector, vec![1.0, 0.0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).with_retry_attempts(3);
    let error = client.embed("hello").await.expect_err("should fail");
    assert_eq!(
        error,
        EmbeddingError::Http {
            status: 401,
            body: "bad key".to_string()
        }
    );
    assert!(!error.is_recoverable());
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_report_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server).with_retry_attempts(2);
    let error = client.embed("hello").await.expect_err("should fail");
    assert!(matches!(error, EmbeddingError::Http { status: 429, .. }));
    assert!(error.is_recoverable());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_responses_are_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": []})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let error = client.embed("hello").await.expect_err("should fail");
    assert!(matches!(error, EmbeddingError::InvalidResponse(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_server_is_a_network_error() {
    let client = RemoteEmbeddingClient::new("http://127.0.0.1:9/v1/embeddings", "m")
        .expect("endpoint should parse")
        .with_retry_attempts(1)
        .with_timeout(Duration::from_secs(2));
    let error = client.embed("hello").await.expect_err("should fail");
    assert!(matches!(error, EmbeddingError::Network(_)));
    assert!(error.is_recoverable());
}

#[test]
#[serial]
fn from_config_requires_api_key_variable() {
    let config = RemoteEmbeddingConfig {
        api_key_env: "RAG_MEMORY_TEST_MISSING_KEY".to_string(),
        ..RemoteEmbeddingConfig::default()
    };
    // SAFETY: serialized with every other test that touches the environment
    unsafe { std::env::remove_var(&config.api_key_env) };
    assert!(matches!(
        RemoteEmbeddingClient::from_config(&config),
        Err(EmbeddingError::NotConfigured)
    ));

    // SAFETY: serialized with every other test that touches the environment
    unsafe { std::env::set_var(&config.api_key_env, "secret") };
    let client = RemoteEmbeddingClient::from_config(&config).expect("should build client");
    assert_eq!(client.api_key.as_deref(), Some("secret"));
    assert_eq!(client.retry_attempts, config.retry_attempts);

    // SAFETY: serialized with every other test that touches the environment
    unsafe { std::env::remove_var(&config.api_key_env) };
}
