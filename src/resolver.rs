//! Config resolver
//!
//! Turns a request's routing hints into a concrete provider, model and merged
//! parameter set. Precedence, highest first:
//!
//! 1. explicit `provider_id` (an unknown id is an error, routes and defaults
//!    are never consulted)
//! 2. the task route named by `task_name`
//! 3. the provider flagged default, else the enabled provider with the lowest
//!    priority (ties keep store order)
//!
//! Parameters are always layered `provider defaults ⊕ task overrides ⊕
//! request overrides`.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{ErrorKind, LlmError};
use crate::store::ConfigStore;
use crate::types::{CallParameters, CallRequest, ProviderConfig, TaskRoute};

/// A fully resolved call target.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    /// Snapshot taken at resolution time
    pub provider: ProviderConfig,
    pub model: String,
    pub params: CallParameters,
}

impl ResolvedTarget {
    pub fn provider_id(&self) -> &str {
        &self.provider.id
    }
}

/// Resolves requests against a [`ConfigStore`], caching task routes.
pub struct ConfigResolver {
    store: Arc<dyn ConfigStore>,
    routes: RwLock<HashMap<String, Option<TaskRoute>>>,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Resolve the primary target of a request.
    pub async fn resolve(&self, request: &CallRequest) -> Result<ResolvedTarget, LlmError> {
        if let Some(id) = request.provider_id.as_deref() {
            let provider = self.explicit_provider(id).await?;
            debug!(provider_id = %provider.id, "resolved explicit provider");
            return Self::finish(provider, None, request);
        }

        let route = match request.task_name.as_deref() {
            Some(task) => self.task_route(task).await?,
            None => None,
        };

        if let Some(id) = route.as_ref().and_then(|r| r.provider_id.as_deref()) {
            let provider = self.store.get_provider_config(id).await?.ok_or_else(|| {
                LlmError::configuration(format!(
                    "task route '{}' names unknown provider '{id}'",
                    route
                        .as_ref()
                        .map(|r| r.task_name.as_str())
                        .unwrap_or_default()
                ))
            })?;
            debug!(provider_id = %provider.id, task = ?request.task_name, "resolved task route");
            return Self::finish(provider, route.as_ref(), request);
        }

        let provider = self.default_provider().await?;
        debug!(provider_id = %provider.id, "resolved default provider");
        Self::finish(provider, route.as_ref(), request)
    }

    /// Resolve a failover target: the candidate's own first catalog model
    /// (unless the request pins one) and its own defaults under the request
    /// overrides.
    pub fn resolve_fallback(
        &self,
        provider: ProviderConfig,
        request: &CallRequest,
    ) -> Result<ResolvedTarget, LlmError> {
        Self::finish(provider, None, request)
    }

    /// Every other enabled provider, ordered by priority.
    ///
    /// After an authentication failure, providers presenting the same
    /// credential to the same endpoint are skipped too.
    pub async fn fallback_candidates(
        &self,
        failed: &ProviderConfig,
        error: &LlmError,
    ) -> Result<Vec<ProviderConfig>, LlmError> {
        let skip_scope = error.root_cause().kind() == ErrorKind::Authentication;
        let mut candidates: Vec<ProviderConfig> = self
            .store
            .list_provider_configs()
            .await?
            .into_iter()
            .filter(|p| p.enabled && p.id != failed.id)
            .filter(|p| !(skip_scope && p.shares_credential_scope(failed)))
            .collect();
        candidates.sort_by_key(|p| p.priority);
        Ok(candidates)
    }

    /// Drop one cached task route.
    pub async fn invalidate_route(&self, task_name: &str) {
        self.routes.write().await.remove(task_name);
    }

    pub async fn invalidate_routes(&self) {
        self.routes.write().await.clear();
    }

    async fn explicit_provider(&self, id: &str) -> Result<ProviderConfig, LlmError> {
        let provider = self
            .store
            .get_provider_config(id)
            .await?
            .ok_or_else(|| LlmError::configuration(format!("provider '{id}' not found")))?;
        if !provider.enabled {
            return Err(LlmError::configuration(format!(
                "provider '{id}' is disabled"
            )));
        }
        Ok(provider)
    }

    async fn task_route(&self, task: &str) -> Result<Option<TaskRoute>, LlmError> {
        if let Some(cached) = self.routes.read().await.get(task) {
            return Ok(cached.clone());
        }
        let route = self.store.get_task_route(task).await?;
        self.routes
            .write()
            .await
            .insert(task.to_string(), route.clone());
        Ok(route)
    }

    async fn default_provider(&self) -> Result<ProviderConfig, LlmError> {
        if let Some(provider) = self.store.get_default_provider_config().await? {
            if provider.enabled {
                return Ok(provider);
            }
            debug!(provider_id = %provider.id, "default provider is disabled, using priority order");
        }
        let mut enabled: Vec<ProviderConfig> = self
            .store
            .list_provider_configs()
            .await?
            .into_iter()
            .filter(|p| p.enabled)
            .collect();
        enabled.sort_by_key(|p| p.priority);
        enabled
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::configuration("no enabled provider configured"))
    }

    fn finish(
        provider: ProviderConfig,
        route: Option<&TaskRoute>,
        request: &CallRequest,
    ) -> Result<ResolvedTarget, LlmError> {
        let model = request
            .model
            .clone()
            .or_else(|| route.and_then(|r| r.model.clone()))
            .or_else(|| provider.default_model().map(str::to_string))
            .ok_or_else(|| {
                LlmError::configuration(format!(
                    "no model resolvable for provider '{}'",
                    provider.id
                ))
            })?;

        let empty = CallParameters::default();
        let task_overrides = route.map(|r| &r.overrides).unwrap_or(&empty);
        let params =
            CallParameters::layered([&provider.defaults, task_overrides, &request.overrides]);

        Ok(ResolvedTarget {
            provider,
            model,
            params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryConfigStore;
    use crate::types::{ChatMessage, ProviderKind};

    fn provider(id: &str, priority: i32) -> ProviderConfig {
        ProviderConfig::new(id, ProviderKind::GenericCompletions)
            .with_base_url(format!("http://{id}.local/v1"))
            .with_models([format!("{id}-model")])
            .with_priority(priority)
    }

    async fn resolver_with(
        providers: Vec<ProviderConfig>,
        routes: Vec<TaskRoute>,
    ) -> (Arc<InMemoryConfigStore>, ConfigResolver) {
        let store = Arc::new(InMemoryConfigStore::new());
        for p in providers {
            store.upsert_provider(p).await;
        }
        for r in routes {
            store.upsert_route(r).await;
        }
        let resolver = ConfigResolver::new(store.clone());
        (store, resolver)
    }

    fn request() -> CallRequest {
        CallRequest::new(vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn explicit_provider_beats_task_route() {
        let (_, resolver) = resolver_with(
            vec![provider("a", 0), provider("b", 1)],
            vec![TaskRoute::new("summarize").with_provider("b").with_model("b-big")],
        )
        .await;

        let target = resolver
            .resolve(&request().with_provider("a").with_task("summarize"))
            .await
            .unwrap();
        assert_eq!(target.provider_id(), "a");
        assert_eq!(target.model, "a-model");
    }

    #[tokio::test]
    async fn missing_explicit_provider_is_a_configuration_error() {
        let (_, resolver) = resolver_with(
            vec![provider("a", 0)],
            vec![TaskRoute::new("summarize").with_provider("a")],
        )
        .await;

        let err = resolver
            .resolve(&request().with_provider("X").with_task("summarize"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ConfigurationError(_)));
        // the route was never looked up
        assert!(resolver.routes.read().await.is_empty());
    }

    #[tokio::test]
    async fn task_route_supplies_provider_model_and_overrides() {
        let defaults = CallParameters::new().with_temperature(0.1).with_max_tokens(10);
        let (_, resolver) = resolver_with(
            vec![provider("a", 0), provider("b", 1).with_defaults(defaults)],
            vec![
                TaskRoute::new("summarize")
                    .with_provider("b")
                    .with_model("b-big")
                    .with_overrides(CallParameters::new().with_temperature(0.5).with_top_p(0.9)),
            ],
        )
        .await;

        let target = resolver
            .resolve(
                &request()
                    .with_task("summarize")
                    .with_overrides(CallParameters::new().with_temperature(0.9)),
            )
            .await
            .unwrap();
        assert_eq!(target.provider_id(), "b");
        assert_eq!(target.model, "b-big");
        assert_eq!(target.params.temperature, Some(0.9));
        assert_eq!(target.params.top_p, Some(0.9));
        assert_eq!(target.params.max_tokens, Some(10));
    }

    #[tokio::test]
    async fn falls_back_to_lowest_priority_then_insertion_order() {
        let (store, resolver) = resolver_with(
            vec![
                provider("late", 5),
                provider("first", 1),
                provider("second", 1),
                provider("off", 0).with_enabled(false),
            ],
            vec![],
        )
        .await;

        let target = resolver.resolve(&request()).await.unwrap();
        assert_eq!(target.provider_id(), "first");

        store.set_default("late").await.unwrap();
        let target = resolver.resolve(&request()).await.unwrap();
        assert_eq!(target.provider_id(), "late");
    }

    #[tokio::test]
    async fn empty_catalog_without_model_fails() {
        let (_, resolver) = resolver_with(
            vec![ProviderConfig::new("a", ProviderKind::OpenAi)],
            vec![],
        )
        .await;
        let err = resolver.resolve(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::ConfigurationError(_)));

        let target = resolver.resolve(&request().with_model("m")).await.unwrap();
        assert_eq!(target.model, "m");
    }

    #[tokio::test]
    async fn route_cache_is_invalidated_explicitly() {
        let (store, resolver) = resolver_with(
            vec![provider("a", 0), provider("b", 1)],
            vec![TaskRoute::new("t").with_provider("a")],
        )
        .await;
        let req = request().with_task("t");
        assert_eq!(resolver.resolve(&req).await.unwrap().provider_id(), "a");

        store.upsert_route(TaskRoute::new("t").with_provider("b")).await;
        assert_eq!(resolver.resolve(&req).await.unwrap().provider_id(), "a");

        resolver.invalidate_route("t").await;
        assert_eq!(resolver.resolve(&req).await.unwrap().provider_id(), "b");
    }

    #[tokio::test]
    async fn fallback_candidates_skip_failed_and_shared_credentials() {
        let shared = |id: &str, priority| {
            ProviderConfig::new(id, ProviderKind::OpenAi)
                .with_credential("same")
                .with_models(["m"])
                .with_priority(priority)
        };
        let (_, resolver) = resolver_with(
            vec![
                shared("a", 0),
                shared("twin", 1),
                provider("c", 3),
                provider("b", 2),
            ],
            vec![],
        )
        .await;
        let failed = resolver.resolve(&request()).await.unwrap().provider;

        let ids = |v: Vec<ProviderConfig>| v.into_iter().map(|p| p.id).collect::<Vec<_>>();

        let transport = LlmError::transport(Some(500), "x");
        let c = resolver.fallback_candidates(&failed, &transport).await.unwrap();
        assert_eq!(ids(c), vec!["twin", "b", "c"]);

        let auth = LlmError::AuthenticationError("bad key".into());
        let c = resolver.fallback_candidates(&failed, &auth).await.unwrap();
        assert_eq!(ids(c), vec!["b", "c"]);
    }
}
