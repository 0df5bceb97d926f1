//! Shared fixtures for the integration tests
//!
//! Every provider points at its own `MockServer`, so expectations never
//! overlap between providers.

#![allow(dead_code)]

use async_trait::async_trait;
use llm_relay::prelude::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_KEY: &str = "test-api-key";

/// Chat-completions response in the documented vendor shape.
pub fn completion_body(text: &str) -> Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "created": 1677652288,
        "model": "mock-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21}
    })
}

pub fn error_body(message: &str) -> Value {
    json!({"error": {"message": message, "type": "server_error", "code": null}})
}

/// SSE body emitting one chunk per delta, then `[DONE]`.
pub fn sse_body(deltas: &[&str]) -> String {
    let mut body = String::new();
    for delta in deltas {
        let chunk = json!({"choices": [{"index": 0, "delta": {"content": delta}}]});
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

/// Chat-completions provider served by `server` under `/v1`.
pub fn compat_provider(id: &str, server: &MockServer, priority: i32) -> ProviderConfig {
    ProviderConfig::new(id, ProviderKind::GenericCompletions)
        .with_base_url(format!("{}/v1", server.uri()))
        .with_credential(TEST_KEY)
        .with_models([format!("{id}-model")])
        .with_priority(priority)
}

pub async fn mount_completion(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(text)))
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(status).set_body_json(error_body("upstream failure")))
        .mount(server)
        .await;
}

pub async fn mount_sse(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}

pub async fn store_with(providers: Vec<ProviderConfig>) -> Arc<InMemoryConfigStore> {
    let store = Arc::new(InMemoryConfigStore::new());
    for provider in providers {
        store.upsert_provider(provider).await;
    }
    store
}

/// `max_attempts` tries against the primary, no backoff delay.
pub fn no_delay(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(max_attempts)
        .with_initial_delay(Duration::ZERO)
        .with_jitter(false)
}

pub fn dispatcher(
    store: Arc<InMemoryConfigStore>,
    log: Arc<InMemoryOutcomeLog>,
    policy: RetryPolicy,
) -> Dispatcher {
    Dispatcher::builder()
        .store(store)
        .outcome_log(log)
        .retry_policy(policy)
        .build()
        .expect("dispatcher")
}

pub fn hello() -> CallRequest {
    CallRequest::new(vec![ChatMessage::user("Hello")])
}

/// Outcome log whose writes always fail.
#[derive(Debug, Default)]
pub struct BrokenOutcomeLog;

#[async_trait]
impl OutcomeLog for BrokenOutcomeLog {
    async fn append_call_outcome(&self, _outcome: &CallOutcome) -> Result<(), LlmError> {
        Err(LlmError::configuration("outcome log is read-only"))
    }
}
