//! HTTP-level tests for the embedding and reasoning providers, using a
//! local mock server. These pin down the wire contract: request shape,
//! response parsing, and the retry policy (retry 429/5xx, fail fast on
//! other 4xx).

use httpmock::prelude::*;

use cadsentry::config::{EmbeddingConfig, ReasoningConfig};
use cadsentry::embedding::{EmbeddingProvider, OllamaProvider, OpenAiProvider};
use cadsentry::models::Verdict;
use cadsentry::reasoning::{OpenAiReasoner, ReasoningProvider};

fn embedding_config(url: &str, max_retries: u32) -> EmbeddingConfig {
    EmbeddingConfig {
        provider: "openai".to_string(),
        model: Some("text-embedding-3-small".to_string()),
        dims: Some(3),
        url: Some(url.to_string()),
        max_retries,
        timeout_secs: 5,
        ..EmbeddingConfig::default()
    }
}

#[tokio::test]
async fn openai_embed_parses_success_response() {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/embeddings")
                .header("authorization", "Bearer test-key")
                .json_body_partial(r#"{"model": "text-embedding-3-small"}"#);
            then.status(200).json_body(serde_json::json!({
                "data": [
                    { "embedding": [0.1, 0.2, 0.3] },
                    { "embedding": [0.4, 0.5, 0.6] }
                ]
            }));
        })
        .await;

    let provider = OpenAiProvider::new(&embedding_config(&server.base_url(), 0)).unwrap();
    let vectors = provider
        .embed(&["alpha".to_string(), "beta".to_string()])
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
}

#[tokio::test]
async fn openai_embed_rejects_wrong_dimensions() {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(200).json_body(serde_json::json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3, 0.4, 0.5] }]
            }));
        })
        .await;

    let provider = OpenAiProvider::new(&embedding_config(&server.base_url(), 0)).unwrap();
    let err = provider.embed(&["alpha".to_string()]).await.unwrap_err();
    assert!(err.to_string().contains("expected 3"));
}

#[tokio::test]
async fn openai_embed_retries_server_errors() {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(500).body("upstream exploded");
        })
        .await;

    let provider = OpenAiProvider::new(&embedding_config(&server.base_url(), 1)).unwrap();
    let err = provider.embed(&["alpha".to_string()]).await.unwrap_err();

    // Initial attempt plus one retry.
    assert_eq!(mock.hits_async().await, 2);
    assert!(err.to_string().contains("500"));
}

#[tokio::test]
async fn openai_embed_fails_fast_on_client_error() {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/embeddings");
            then.status(400).body("bad request");
        })
        .await;

    let provider = OpenAiProvider::new(&embedding_config(&server.base_url(), 5)).unwrap();
    let err = provider.embed(&["alpha".to_string()]).await.unwrap_err();

    // No retries for a non-429 client error.
    assert_eq!(mock.hits_async().await, 1);
    assert!(err.to_string().contains("400"));
}

#[tokio::test]
async fn ollama_embed_parses_success_response() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/embed")
                .json_body_partial(r#"{"model": "nomic-embed-text"}"#);
            then.status(200).json_body(serde_json::json!({
                "embeddings": [[1.0, 0.0, 0.0]]
            }));
        })
        .await;

    let config = EmbeddingConfig {
        provider: "ollama".to_string(),
        model: Some("nomic-embed-text".to_string()),
        dims: Some(3),
        url: Some(server.base_url()),
        max_retries: 0,
        timeout_secs: 5,
        ..EmbeddingConfig::default()
    };
    let provider = OllamaProvider::new(&config).unwrap();
    let vectors = provider.embed(&["alpha".to_string()]).await.unwrap();

    mock.assert_async().await;
    assert_eq!(vectors, vec![vec![1.0, 0.0, 0.0]]);
}

#[tokio::test]
async fn openai_judge_parses_chat_response() {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .json_body_partial(r#"{"model": "gpt-4o-mini"}"#);
            then.status(200).json_body(serde_json::json!({
                "choices": [{
                    "message": {
                        "content": "{\"verdict\": \"non_compliant\", \
                            \"explanation\": \"Datum reference missing.\", \
                            \"suggested_fix\": \"Add datum A.\", \
                            \"cited_clauses\": [1]}"
                    }
                }]
            }));
        })
        .await;

    let config = ReasoningConfig {
        provider: "openai".to_string(),
        model: Some("gpt-4o-mini".to_string()),
        url: Some(server.base_url()),
        max_retries: 0,
        timeout_secs: 5,
    };
    let reasoner = OpenAiReasoner::new(&config).unwrap();
    let judgment = reasoner.judge("prompt text", 3).await.unwrap();

    mock.assert_async().await;
    assert_eq!(judgment.verdict, Verdict::NonCompliant);
    assert_eq!(judgment.suggested_fix.as_deref(), Some("Add datum A."));
    assert_eq!(judgment.cited, vec![0]);
}

#[tokio::test]
async fn openai_judge_fails_fast_on_client_error() {
    std::env::set_var("OPENAI_API_KEY", "test-key");
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401).body("invalid key");
        })
        .await;

    let config = ReasoningConfig {
        provider: "openai".to_string(),
        model: Some("gpt-4o-mini".to_string()),
        url: Some(server.base_url()),
        max_retries: 4,
        timeout_secs: 5,
    };
    let reasoner = OpenAiReasoner::new(&config).unwrap();
    let err = reasoner.judge("prompt text", 3).await.unwrap_err();

    assert_eq!(mock.hits_async().await, 1);
    assert!(err.to_string().contains("401"));
}
