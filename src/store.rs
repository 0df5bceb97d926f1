//! Configuration storage and outcome log interfaces
//!
//! The dispatcher only reads provider configs and task routes, and only
//! appends outcome records. The in-memory implementations here back tests and
//! embedders that keep configuration elsewhere.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::RwLock;

use crate::error::LlmError;
use crate::types::{CallOutcome, OutcomeStatus, ProviderConfig, TaskRoute};

/// Read side of the configuration store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get_provider_config(&self, id: &str) -> Result<Option<ProviderConfig>, LlmError>;

    /// All providers, in insertion order.
    async fn list_provider_configs(&self) -> Result<Vec<ProviderConfig>, LlmError>;

    async fn get_default_provider_config(&self) -> Result<Option<ProviderConfig>, LlmError>;

    async fn get_task_route(&self, task_name: &str) -> Result<Option<TaskRoute>, LlmError>;
}

/// Append-only outcome log.
#[async_trait]
pub trait OutcomeLog: Send + Sync {
    async fn append_call_outcome(&self, outcome: &CallOutcome) -> Result<(), LlmError>;
}

#[derive(Debug, Default, Deserialize)]
struct StoreSeed {
    #[serde(default)]
    providers: Vec<ProviderConfig>,
    #[serde(default)]
    routes: Vec<TaskRoute>,
}

#[derive(Debug, Default)]
struct StoreInner {
    providers: Vec<ProviderConfig>,
    routes: HashMap<String, TaskRoute>,
}

/// In-memory configuration store
///
/// Writes keep the "at most one default provider" invariant.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from `{"providers": [...], "routes": [...]}`.
    pub fn from_json(json: &str) -> Result<Self, LlmError> {
        let seed: StoreSeed = serde_json::from_str(json)
            .map_err(|e| LlmError::configuration(format!("invalid store document: {e}")))?;
        let mut inner = StoreInner::default();
        for provider in seed.providers {
            inner.upsert(provider);
        }
        for route in seed.routes {
            inner.routes.insert(route.task_name.clone(), route);
        }
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, LlmError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            LlmError::configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Insert or replace a provider. Replacing keeps its original position.
    pub async fn upsert_provider(&self, config: ProviderConfig) {
        self.inner.write().await.upsert(config);
    }

    /// Flag one provider as default and clear the flag everywhere else.
    pub async fn set_default(&self, id: &str) -> Result<(), LlmError> {
        let mut inner = self.inner.write().await;
        if !inner.providers.iter().any(|p| p.id == id) {
            return Err(LlmError::configuration(format!("unknown provider '{id}'")));
        }
        for provider in inner.providers.iter_mut() {
            provider.is_default = provider.id == id;
        }
        Ok(())
    }

    pub async fn remove_provider(&self, id: &str) -> Option<ProviderConfig> {
        let mut inner = self.inner.write().await;
        let index = inner.providers.iter().position(|p| p.id == id)?;
        Some(inner.providers.remove(index))
    }

    pub async fn upsert_route(&self, route: TaskRoute) {
        self.inner
            .write()
            .await
            .routes
            .insert(route.task_name.clone(), route);
    }

    pub async fn remove_route(&self, task_name: &str) -> Option<TaskRoute> {
        self.inner.write().await.routes.remove(task_name)
    }
}

impl StoreInner {
    fn upsert(&mut self, config: ProviderConfig) {
        if config.is_default {
            for other in self.providers.iter_mut() {
                other.is_default = false;
            }
        }
        match self.providers.iter_mut().find(|p| p.id == config.id) {
            Some(existing) => *existing = config,
            None => self.providers.push(config),
        }
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get_provider_config(&self, id: &str) -> Result<Option<ProviderConfig>, LlmError> {
        let inner = self.inner.read().await;
        Ok(inner.providers.iter().find(|p| p.id == id).cloned())
    }

    async fn list_provider_configs(&self) -> Result<Vec<ProviderConfig>, LlmError> {
        Ok(self.inner.read().await.providers.clone())
    }

    async fn get_default_provider_config(&self) -> Result<Option<ProviderConfig>, LlmError> {
        let inner = self.inner.read().await;
        Ok(inner.providers.iter().find(|p| p.is_default).cloned())
    }

    async fn get_task_route(&self, task_name: &str) -> Result<Option<TaskRoute>, LlmError> {
        Ok(self.inner.read().await.routes.get(task_name).cloned())
    }
}

/// Outcome log that keeps records in memory.
#[derive(Debug, Default)]
pub struct InMemoryOutcomeLog {
    records: Mutex<Vec<CallOutcome>>,
}

impl InMemoryOutcomeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record appended so far.
    pub fn records(&self) -> Vec<CallOutcome> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutcomeLog for InMemoryOutcomeLog {
    async fn append_call_outcome(&self, outcome: &CallOutcome) -> Result<(), LlmError> {
        self.records
            .lock()
            .map_err(|_| LlmError::configuration("outcome log lock poisoned"))?
            .push(outcome.clone());
        Ok(())
    }
}

/// Outcome log that emits each record as a `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingOutcomeLog;

#[async_trait]
impl OutcomeLog for TracingOutcomeLog {
    async fn append_call_outcome(&self, outcome: &CallOutcome) -> Result<(), LlmError> {
        match outcome.status {
            OutcomeStatus::Success => tracing::info!(
                request_id = %outcome.request_id,
                provider_id = %outcome.provider_id,
                model = %outcome.model,
                attempt = outcome.attempt,
                fallback = outcome.fallback,
                duration_ms = outcome.duration.as_millis() as u64,
                input_tokens = outcome.usage.map(|u| u.input_tokens),
                output_tokens = outcome.usage.map(|u| u.output_tokens),
                "call succeeded"
            ),
            OutcomeStatus::Failure => tracing::warn!(
                request_id = %outcome.request_id,
                provider_id = %outcome.provider_id,
                model = %outcome.model,
                attempt = outcome.attempt,
                fallback = outcome.fallback,
                duration_ms = outcome.duration.as_millis() as u64,
                error = outcome.error_message.as_deref().unwrap_or_default(),
                "call failed"
            ),
        }
        Ok(())
    }
}
