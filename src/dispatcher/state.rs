//! Retry/failover state machine
//!
//! Pure transitions only; the dispatcher performs the I/O each state asks
//! for and feeds the result back in.

use std::time::Duration;

use crate::error::{ErrorKind, LlmError};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatchState {
    Resolving,
    /// 0-based attempt against the primary provider
    AttemptingPrimary { attempt: u32 },
    /// Waiting before `next_attempt`
    RetryingPrimary { next_attempt: u32, delay: Duration },
    FailingOverToNext,
    /// Index into the fallback candidate list
    AttemptingFallback { index: usize },
    Succeeded,
    /// A failure that must not be retried or failed over
    Failed,
    Exhausted,
}

impl DispatchState {
    pub fn resolved(self) -> Self {
        match self {
            Self::Resolving => Self::AttemptingPrimary { attempt: 0 },
            other => other,
        }
    }

    /// Any attempt succeeded.
    pub fn succeeded(self) -> Self {
        match self {
            Self::AttemptingPrimary { .. } | Self::AttemptingFallback { .. } => Self::Succeeded,
            other => other,
        }
    }

    pub fn primary_failed(self, error: &LlmError, policy: &RetryPolicy) -> Self {
        let Self::AttemptingPrimary { attempt } = self else {
            return self;
        };
        if error.kind() == ErrorKind::Configuration {
            return Self::Failed;
        }
        if policy.should_retry(error, attempt) {
            return Self::RetryingPrimary {
                next_attempt: attempt + 1,
                delay: policy.calculate_delay(attempt),
            };
        }
        if error.allows_failover() {
            Self::FailingOverToNext
        } else {
            Self::Failed
        }
    }

    pub fn backoff_elapsed(self) -> Self {
        match self {
            Self::RetryingPrimary { next_attempt, .. } => Self::AttemptingPrimary {
                attempt: next_attempt,
            },
            other => other,
        }
    }

    pub fn candidates_ready(self, count: usize) -> Self {
        match self {
            Self::FailingOverToNext if count == 0 => Self::Exhausted,
            Self::FailingOverToNext => Self::AttemptingFallback { index: 0 },
            other => other,
        }
    }

    /// A fallback candidate failed; each candidate gets exactly one attempt.
    pub fn fallback_failed(self, count: usize) -> Self {
        match self {
            Self::AttemptingFallback { index } if index + 1 < count => {
                Self::AttemptingFallback { index: index + 1 }
            }
            Self::AttemptingFallback { .. } => Self::Exhausted,
            other => other,
        }
    }
}
