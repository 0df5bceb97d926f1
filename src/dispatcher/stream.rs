//! Committed streams
//!
//! Once an attempt has produced its first event the stream is handed to the
//! caller as-is: later failures are surfaced, never retried. The attempt's
//! outcome is recorded when the stream finishes, fails or is dropped.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Instant;

use super::record_outcome;
use crate::error::LlmError;
use crate::store::OutcomeLog;
use crate::streaming::{DispatchStream, StreamEvent, TextEvent, TextStream};
use crate::types::{AttemptContext, Usage};

/// Records exactly one outcome for a committed stream.
struct OutcomeGuard {
    log: Arc<dyn OutcomeLog>,
    ctx: AttemptContext,
    started: Instant,
    finished: bool,
}

impl OutcomeGuard {
    async fn finish(&mut self, result: Result<Option<Usage>, &LlmError>) {
        self.finished = true;
        let elapsed = self.started.elapsed();
        let outcome = match result {
            Ok(usage) => self.ctx.success(usage, elapsed),
            Err(error) => self.ctx.failure(error, elapsed),
        };
        record_outcome(self.log.as_ref(), &outcome).await;
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let outcome = self.ctx.failure(
            &LlmError::StreamError("stream dropped before completion".into()),
            self.started.elapsed(),
        );
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let log = self.log.clone();
            handle.spawn(async move { record_outcome(log.as_ref(), &outcome).await });
        }
    }
}

/// Wrap a stream whose first event has already been read.
pub(crate) fn committed_stream(
    first: TextEvent,
    rest: TextStream,
    ctx: AttemptContext,
    started: Instant,
    log: Arc<dyn OutcomeLog>,
) -> DispatchStream {
    let provider_id = ctx.provider_id.clone();
    let model = ctx.model.clone();
    // Built outside the generator so a stream dropped before its first poll
    // still records the attempt.
    let guard = OutcomeGuard {
        log,
        ctx,
        started,
        finished: false,
    };

    let out = async_stream::stream! {
        let mut guard = guard;
        let mut rest = rest;
        let mut pending = Some(first);

        loop {
            let item = match pending.take() {
                Some(event) => Some(Ok(event)),
                None => rest.next().await,
            };
            match item {
                Some(Ok(TextEvent::Delta(delta))) => yield Ok(StreamEvent::Delta(delta)),
                Some(Ok(TextEvent::Done { text, usage })) => {
                    guard.finish(Ok(usage)).await;
                    yield Ok(StreamEvent::Done {
                        text,
                        provider_id: provider_id.clone(),
                        model: model.clone(),
                        usage,
                    });
                    return;
                }
                Some(Err(error)) => {
                    guard.finish(Err(&error)).await;
                    yield Err(error);
                    return;
                }
                None => {
                    let error = LlmError::StreamError("stream ended without a completion event".into());
                    guard.finish(Err(&error)).await;
                    yield Err(error);
                    return;
                }
            }
        }
    };

    Box::pin(out)
}
