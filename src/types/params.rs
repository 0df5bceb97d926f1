//! Call parameters and right-wins merging
//!
//! Parameters are layered `provider defaults ⊕ task overrides ⊕ request
//! overrides`; a value present in a later layer replaces the earlier one.
//! Vendor-specific fields that have no typed slot live in `extra` and are
//! flattened into the request body.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-attempt timeout used when no layer sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Generation parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Per-attempt timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Extra vendor fields, flattened into the request body
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CallParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop_sequences = Some(stop);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Layer `overrides` on top of `self`. Keys set in `overrides` win.
    pub fn merge(&self, overrides: &CallParameters) -> CallParameters {
        let mut extra = self.extra.clone();
        for (k, v) in &overrides.extra {
            extra.insert(k.clone(), v.clone());
        }
        CallParameters {
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            top_p: overrides.top_p.or(self.top_p),
            stop_sequences: overrides
                .stop_sequences
                .clone()
                .or_else(|| self.stop_sequences.clone()),
            timeout_ms: overrides.timeout_ms.or(self.timeout_ms),
            extra,
        }
    }

    /// Merge any number of layers, left to right.
    pub fn layered<'a, I>(layers: I) -> CallParameters
    where
        I: IntoIterator<Item = &'a CallParameters>,
    {
        layers
            .into_iter()
            .fold(CallParameters::default(), |acc, layer| acc.merge(layer))
    }
}
