//! Streaming dispatch: failover before the first chunk, never after it

mod support;

use futures::StreamExt;
use llm_relay::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::*;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn drain(mut stream: DispatchStream) -> Vec<Result<StreamEvent, LlmError>> {
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item);
    }
    items
}

#[tokio::test]
async fn streams_deltas_then_a_single_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["Hel", "lo", "!"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let store = store_with(vec![compat_provider("p", &server, 0)]).await;
    let log = Arc::new(InMemoryOutcomeLog::new());
    let dispatcher = dispatcher(store, log.clone(), RetryPolicy::none());

    let stream = dispatcher.stream_call(hello()).await.unwrap();
    let items = drain(stream).await;

    let deltas: Vec<String> = items
        .iter()
        .filter_map(|i| match i {
            Ok(StreamEvent::Delta(d)) => Some(d.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Hel", "lo", "!"]);
    match items.last() {
        Some(Ok(StreamEvent::Done {
            text,
            provider_id,
            model,
            ..
        })) => {
            assert_eq!(text, "Hello!");
            assert_eq!(provider_id, "p");
            assert_eq!(model, "p-model");
        }
        other => panic!("unexpected final item: {other:?}"),
    }

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert!(records[0].is_success());
}

#[tokio::test]
async fn failure_before_the_first_chunk_fails_over() {
    let broken = MockServer::start().await;
    let backup = MockServer::start().await;
    mount_status(&broken, 503).await;
    mount_sse(&backup, sse_body(&["from ", "backup"])).await;

    let store = store_with(vec![
        compat_provider("broken", &broken, 0),
        compat_provider("backup", &backup, 1),
    ])
    .await;
    let log = Arc::new(InMemoryOutcomeLog::new());
    let dispatcher = dispatcher(store, log.clone(), no_delay(2));

    let stream = dispatcher.stream_call(hello()).await.unwrap();
    let result = collect_stream(stream).await.unwrap();
    assert_eq!(result.content, "from backup");
    assert_eq!(result.provider_id, "backup");

    let records = log.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].provider_id, "broken");
    assert_eq!(records[1].provider_id, "broken");
    assert!(records[2].is_success() && records[2].fallback);
}

#[tokio::test]
async fn slow_first_chunk_times_out_and_fails_over() {
    let slow = MockServer::start().await;
    let backup = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body(&["too late"]), "text/event-stream")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&slow)
        .await;
    mount_sse(&backup, sse_body(&["on ", "time"])).await;

    let store = store_with(vec![
        compat_provider("slow", &slow, 0),
        compat_provider("backup", &backup, 1),
    ])
    .await;
    let log = Arc::new(InMemoryOutcomeLog::new());
    let dispatcher = dispatcher(store, log.clone(), no_delay(1));

    let request =
        hello().with_overrides(CallParameters::new().with_timeout(Duration::from_millis(100)));
    let result = collect_stream(dispatcher.stream_call(request).await.unwrap())
        .await
        .unwrap();
    assert_eq!(result.provider_id, "backup");
    assert_eq!(result.content, "on time");

    let records = log.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].provider_id, "slow");
    assert_eq!(records[0].error_kind, Some(ErrorKind::Transport));
    assert!(records[0].error_message.as_deref().unwrap_or_default().contains("timed out"));
    assert!(records[1].is_success() && records[1].fallback);
}

#[tokio::test]
async fn dropping_an_unread_stream_still_records_the_attempt() {
    let server = MockServer::start().await;
    mount_sse(&server, sse_body(&["unread"])).await;

    let store = store_with(vec![compat_provider("p", &server, 0)]).await;
    let log = Arc::new(InMemoryOutcomeLog::new());
    let dispatcher = dispatcher(store, log.clone(), RetryPolicy::none());

    let stream = dispatcher.stream_call(hello()).await.unwrap();
    drop(stream);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].provider_id, "p");
    assert_eq!(records[0].status, OutcomeStatus::Failure);
}

#[tokio::test]
async fn in_band_error_before_any_text_fails_over() {
    let erroring = MockServer::start().await;
    let backup = MockServer::start().await;
    let body = format!(
        "data: {}\n\n",
        json!({"error": {"message": "model overloaded", "type": "server_error"}})
    );
    mount_sse(&erroring, body).await;
    mount_sse(&backup, sse_body(&["fine"])).await;

    let store = store_with(vec![
        compat_provider("erroring", &erroring, 0),
        compat_provider("backup", &backup, 1),
    ])
    .await;
    let dispatcher = dispatcher(store, Arc::new(InMemoryOutcomeLog::new()), no_delay(1));

    let stream = dispatcher.stream_call(hello()).await.unwrap();
    let result = collect_stream(stream).await.unwrap();
    assert_eq!(result.provider_id, "backup");
    assert_eq!(result.content, "fine");
}

#[tokio::test]
async fn mid_stream_errors_surface_once_without_replay() {
    let flaky = MockServer::start().await;
    let backup = MockServer::start().await;
    let body = format!(
        "data: {}\n\ndata: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {"content": "partial"}}]}),
        json!({"error": {"message": "connection reset by vendor"}})
    );
    mount_sse(&flaky, body).await;
    mount_sse(&backup, sse_body(&["never"])).await;

    let store = store_with(vec![
        compat_provider("flaky", &flaky, 0),
        compat_provider("backup", &backup, 1),
    ])
    .await;
    let log = Arc::new(InMemoryOutcomeLog::new());
    let dispatcher = dispatcher(store, log.clone(), no_delay(3));

    let stream = dispatcher.stream_call(hello()).await.unwrap();
    let items = drain(stream).await;

    assert_eq!(items.len(), 2);
    assert!(matches!(&items[0], Ok(StreamEvent::Delta(d)) if d == "partial"));
    assert!(matches!(&items[1], Err(LlmError::StreamError(m)) if m.contains("connection reset")));

    assert!(backup.received_requests().await.unwrap().is_empty());
    assert_eq!(flaky.received_requests().await.unwrap().len(), 1);

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, OutcomeStatus::Failure);
}

#[tokio::test]
async fn malformed_chunks_are_skipped() {
    let server = MockServer::start().await;
    let body = format!(
        "data: {{not json\n\n: keep-alive\n\ndata: {}\n\ndata: [DONE]\n\n",
        json!({"choices": [{"index": 0, "delta": {"content": "ok"}}], "usage": {"prompt_tokens": 2, "completion_tokens": 1}})
    );
    mount_sse(&server, body).await;

    let store = store_with(vec![compat_provider("p", &server, 0)]).await;
    let dispatcher = dispatcher(store, Arc::new(InMemoryOutcomeLog::new()), RetryPolicy::none());

    let result = collect_stream(dispatcher.stream_call(hello()).await.unwrap())
        .await
        .unwrap();
    assert_eq!(result.content, "ok");
    assert_eq!(result.usage, Some(Usage::new(2, 1)));
}

#[tokio::test]
async fn anthropic_streams_content_block_deltas() {
    let server = MockServer::start().await;
    let events = [
        json!({"type": "message_start", "message": {"usage": {"input_tokens": 7}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hi"}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": " there"}}),
        json!({"type": "message_delta", "usage": {"output_tokens": 3}}),
        json!({"type": "message_stop"}),
    ];
    let body: String = events
        .iter()
        .map(|e| {
            let name = e["type"].as_str().unwrap_or_default();
            format!("event: {name}\ndata: {e}\n\n")
        })
        .collect();
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = ProviderConfig::new("claude", ProviderKind::Anthropic)
        .with_base_url(format!("{}/v1", server.uri()))
        .with_credential(TEST_KEY)
        .with_models(["claude-3-5-haiku-latest"]);
    let store = store_with(vec![provider]).await;
    let dispatcher = dispatcher(store, Arc::new(InMemoryOutcomeLog::new()), RetryPolicy::none());

    let result = collect_stream(dispatcher.stream_call(hello()).await.unwrap())
        .await
        .unwrap();
    assert_eq!(result.content, "Hi there");
    assert_eq!(result.usage, Some(Usage::new(7, 3)));
}
