//! Call requests, results and outcome records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CallParameters, ChatMessage};
use crate::error::{ErrorKind, LlmError};

/// One logical "generate text" request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub messages: Vec<ChatMessage>,
    /// Explicit provider; beats any task route or default flag
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub overrides: CallParameters,
}

impl CallRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_task(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = Some(task_name.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_overrides(mut self, overrides: CallParameters) -> Self {
        self.overrides = overrides;
        self
    }
}

/// Token usage reported by the vendor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Result of one successful attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    pub content: String,
    pub model: String,
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Append-only record describing a single attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallOutcome {
    /// Shared by every attempt of one logical request
    pub request_id: String,
    pub provider_id: String,
    pub model: String,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(with = "super::duration_ms")]
    pub duration: Duration,
    /// 1-based attempt number within the logical request
    pub attempt: u32,
    pub fallback: bool,
    pub recorded_at: DateTime<Utc>,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Shared fields for the outcome records of one attempt.
#[derive(Debug, Clone)]
pub(crate) struct AttemptContext {
    pub request_id: String,
    pub provider_id: String,
    pub model: String,
    pub task_name: Option<String>,
    pub attempt: u32,
    pub fallback: bool,
}

impl AttemptContext {
    pub fn success(&self, usage: Option<Usage>, duration: Duration) -> CallOutcome {
        self.record(OutcomeStatus::Success, usage, None, duration)
    }

    pub fn failure(&self, error: &LlmError, duration: Duration) -> CallOutcome {
        self.record(OutcomeStatus::Failure, None, Some(error), duration)
    }

    fn record(
        &self,
        status: OutcomeStatus,
        usage: Option<Usage>,
        error: Option<&LlmError>,
        duration: Duration,
    ) -> CallOutcome {
        CallOutcome {
            request_id: self.request_id.clone(),
            provider_id: self.provider_id.clone(),
            model: self.model.clone(),
            task_name: self.task_name.clone(),
            usage,
            status,
            error_kind: error.map(LlmError::kind),
            error_message: error.map(ToString::to_string),
            duration,
            attempt: self.attempt,
            fallback: self.fallback,
            recorded_at: Utc::now(),
        }
    }
}

/// Result of a provider reachability probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub ok: bool,
    pub message: String,
    #[serde(with = "super::duration_ms")]
    pub latency: Duration,
    #[serde(default)]
    pub available_models: Option<Vec<String>>,
}

impl AvailabilityReport {
    pub fn available(latency: Duration, models: Option<Vec<String>>) -> Self {
        Self {
            ok: true,
            message: "ok".to_string(),
            latency,
            available_models: models,
        }
    }

    pub fn unavailable(latency: Duration, error: &LlmError) -> Self {
        Self {
            ok: false,
            message: error.to_string(),
            latency,
            available_models: None,
        }
    }
}
