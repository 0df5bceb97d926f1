//! Dispatcher settings
//!
//! Every field has a default, so an empty JSON object is a valid settings
//! document.
//!
//! ```json
//! {
//!   "retry": { "max_attempts": 3, "initial_delay_ms": 500, "backoff": "linear" },
//!   "adapter_cache_capacity": 64,
//!   "http": { "connect_timeout_ms": 10000, "default_timeout_ms": 60000 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use crate::error::LlmError;
use crate::retry::{Backoff, RetryPolicy};

pub const ENV_MAX_ATTEMPTS: &str = "LLM_RELAY_MAX_ATTEMPTS";
pub const ENV_RETRY_DELAY_MS: &str = "LLM_RELAY_RETRY_DELAY_MS";

const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Retry section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
    pub multiplier: f64,
    pub jitter: bool,
    pub fail_fast_on_auth: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff: policy.backoff,
            multiplier: policy.backoff_multiplier,
            jitter: policy.use_jitter,
            fail_fast_on_auth: policy.fail_fast_on_auth,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_backoff(self.backoff)
            .with_backoff_multiplier(self.multiplier)
            .with_jitter(self.jitter)
            .with_fail_fast_on_auth(self.fail_fast_on_auth)
    }
}

/// HTTP client section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_ms: u64,
    /// Per-attempt timeout when no parameter layer sets one
    pub default_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            default_timeout_ms: crate::types::DEFAULT_TIMEOUT.as_millis() as u64,
            user_agent: format!("llm-relay/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Build the shared HTTP client.
    pub fn build_client(&self) -> Result<reqwest::Client, LlmError> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout())
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| LlmError::configuration(format!("failed to build HTTP client: {e}")))
    }
}

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub retry: RetrySettings,
    pub adapter_cache_capacity: usize,
    pub http: HttpSettings,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            adapter_cache_capacity: DEFAULT_CACHE_CAPACITY,
            http: HttpSettings::default(),
        }
    }
}

impl DispatchSettings {
    pub fn from_json_str(json: &str) -> Result<Self, LlmError> {
        serde_json::from_str(json)
            .map_err(|e| LlmError::configuration(format!("invalid settings: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LlmError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            LlmError::configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Apply `LLM_RELAY_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, LlmError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, LlmError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            self.retry.max_attempts = parse_env(ENV_MAX_ATTEMPTS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RETRY_DELAY_MS) {
            self.retry.initial_delay_ms = parse_env(ENV_RETRY_DELAY_MS, &raw)?;
        }
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }

    pub fn cache_capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.adapter_cache_capacity).unwrap_or(NonZeroUsize::MIN)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, LlmError> {
    raw.trim()
        .parse()
        .map_err(|_| LlmError::configuration(format!("{key} has an invalid value: '{raw}'")))
}
