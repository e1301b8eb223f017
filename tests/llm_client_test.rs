//! Integration tests for the LLM completion client
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use std::sync::Arc;

use serde_json::{json, Map};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use agentic_reasoning_core::config::{LlmConfig, RequestConfig};
use agentic_reasoning_core::error::LlmError;
use agentic_reasoning_core::llm::{CompletionParams, LlmClient};
use agentic_reasoning_core::tools::{LlmTool, OutcomeStatus, ToolExecutor, ToolRegistry};

/// Create a test client pointing to mock server
fn create_test_client(base_url: &str, max_retries: u32) -> LlmClient {
    let config = LlmConfig {
        api_key: "test-api-key".to_string(),
        base_url: base_url.to_string(),
        model: "test-model".to_string(),
    };

    let request_config = RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    };

    LlmClient::new(&config, request_config).expect("Failed to create client")
}

fn completion_body(text: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": text}}],
        "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
    })
}

#[tokio::test]
async fn test_successful_completion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-api-key"))
        .and(body_partial_json(json!({"model": "test-model"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Paris")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), 0);
    let text = client
        .complete("Capital of France?", &CompletionParams::default())
        .await
        .unwrap();
    assert_eq!(text, "Paris");
}

#[tokio::test]
async fn test_server_error_is_retried_then_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), 2);
    let err = client
        .complete("hello", &CompletionParams::default())
        .await
        .unwrap_err();
    match err {
        LlmError::Unavailable { message, retries } => {
            assert_eq!(retries, 3);
            assert!(message.contains("503"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), 3);
    let err = client
        .complete("hello", &CompletionParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::InvalidResponse { .. }));
}

#[tokio::test]
async fn test_llm_tool_through_executor() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("The supplier is late.")))
        .mount(&mock_server)
        .await;

    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(LlmTool::new(create_test_client(&mock_server.uri(), 0))))
        .unwrap();
    let executor = ToolExecutor::new(
        Arc::new(registry),
        &RequestConfig {
            timeout_ms: 5000,
            max_retries: 0,
            retry_delay_ms: 1,
        },
    );

    let mut args = Map::new();
    args.insert("prompt".to_string(), json!("Is the supplier late?"));
    let outcome = executor.execute(LlmTool::NAME, &args).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Success);
    assert!(outcome.value.unwrap().to_string().contains("supplier is late"));
}

#[tokio::test]
async fn test_llm_tool_attempts_are_bounded_by_executor_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let request = RequestConfig {
        timeout_ms: 5000,
        max_retries: 1,
        retry_delay_ms: 1,
    };
    let tool = LlmTool::from_config(
        &LlmConfig {
            api_key: "test-api-key".to_string(),
            base_url: mock_server.uri(),
            model: "test-model".to_string(),
        },
        &request,
    )
    .unwrap();
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(tool)).unwrap();
    let executor = ToolExecutor::new(Arc::new(registry), &request);

    let mut args = Map::new();
    args.insert("prompt".to_string(), json!("Is the supplier late?"));
    let outcome = executor.execute(LlmTool::NAME, &args).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.attempts, 2);
}
