//! Streaming decoder
//!
//! Turns an SSE byte stream into text deltas followed by a single terminal
//! [`TextEvent::Done`] carrying the concatenated text. SSE framing (line
//! splitting, `data:` prefixes, comment and blank lines) is handled by
//! `eventsource-stream`; this module only interprets payloads.

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use tracing::debug;

use crate::error::LlmError;
use crate::types::{CallResult, Usage};

/// End-of-stream sentinel sent by chat-completions vendors.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Where the incremental text lives in a vendor's stream payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaPath {
    /// `choices[0].delta.content`
    ChoicesDeltaContent,
    /// `delta.text` of `content_block_delta` events
    ContentBlockDeltaText,
}

impl DeltaPath {
    fn text<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        match self {
            Self::ChoicesDeltaContent => payload
                .get("choices")?
                .get(0)?
                .get("delta")?
                .get("content")?
                .as_str(),
            Self::ContentBlockDeltaText => {
                if payload.get("type")?.as_str()? != "content_block_delta" {
                    return None;
                }
                payload.get("delta")?.get("text")?.as_str()
            }
        }
    }

    fn usage(&self, payload: &Value, usage: &mut Option<Usage>) {
        match self {
            Self::ChoicesDeltaContent => {
                if let Some(u) = payload.get("usage").filter(|u| !u.is_null()) {
                    *usage = Some(Usage::new(
                        token_count(u, "prompt_tokens"),
                        token_count(u, "completion_tokens"),
                    ));
                }
            }
            Self::ContentBlockDeltaText => {
                match payload.get("type").and_then(Value::as_str) {
                    Some("message_start") => {
                        if let Some(u) = payload.get("message").and_then(|m| m.get("usage")) {
                            let entry = usage.get_or_insert_with(Usage::default);
                            entry.input_tokens = token_count(u, "input_tokens");
                        }
                    }
                    Some("message_delta") => {
                        if let Some(u) = payload.get("usage") {
                            let entry = usage.get_or_insert_with(Usage::default);
                            entry.output_tokens = token_count(u, "output_tokens");
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

fn token_count(usage: &Value, key: &str) -> u32 {
    usage.get(key).and_then(Value::as_u64).unwrap_or_default() as u32
}

/// In-band vendor error (`{"type":"error",...}` or `{"error":{...}}`).
fn vendor_stream_error(payload: &Value) -> Option<String> {
    let is_error_event = payload.get("type").and_then(Value::as_str) == Some("error");
    let error = payload.get("error")?;
    if !is_error_event && !error.is_object() {
        return None;
    }
    Some(
        error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}

/// Adapter-level stream item.
#[derive(Debug, Clone, PartialEq)]
pub enum TextEvent {
    Delta(String),
    Done { text: String, usage: Option<Usage> },
}

pub type TextStream = Pin<Box<dyn Stream<Item = Result<TextEvent, LlmError>> + Send>>;

/// Caller-facing stream item.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    /// Always the last item of a successful stream
    Done {
        text: String,
        provider_id: String,
        model: String,
        usage: Option<Usage>,
    },
}

pub type DispatchStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

/// Decode an SSE byte stream into text events.
///
/// Malformed payloads are skipped; a transport error ends the stream with a
/// [`LlmError::StreamError`].
pub fn decode_text_stream<S, B, E>(byte_stream: S, path: DeltaPath) -> TextStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let out = async_stream::stream! {
        let mut events = Box::pin(byte_stream.eventsource());
        let mut text = String::new();
        let mut usage: Option<Usage> = None;

        while let Some(item) = events.next().await {
            let event = match item {
                Ok(ev) => ev,
                Err(e) => {
                    yield Err(LlmError::StreamError(format!("SSE stream error: {e}")));
                    return;
                }
            };

            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == DONE_SENTINEL {
                break;
            }

            let payload: Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, line = %data, "skipping malformed stream payload");
                    continue;
                }
            };

            if let Some(message) = vendor_stream_error(&payload) {
                yield Err(LlmError::StreamError(message));
                return;
            }

            path.usage(&payload, &mut usage);
            if let Some(delta) = path.text(&payload).filter(|d| !d.is_empty()) {
                text.push_str(delta);
                yield Ok(TextEvent::Delta(delta.to_string()));
            }
        }

        yield Ok(TextEvent::Done { text, usage });
    };

    Box::pin(out)
}

/// Drain a dispatch stream into a buffered result.
pub async fn collect_stream(mut stream: DispatchStream) -> Result<CallResult, LlmError> {
    while let Some(item) = stream.next().await {
        if let StreamEvent::Done {
            text,
            provider_id,
            model,
            usage,
        } = item?
        {
            return Ok(CallResult {
                content: text,
                model,
                provider_id,
                usage,
            });
        }
    }
    Err(LlmError::StreamError(
        "stream ended without a completion event".into(),
    ))
}
