//! Resilience dispatcher
//!
//! Resolves a request, retries the primary provider with backoff, then fails
//! over to the remaining enabled providers in priority order, one attempt
//! each. Every attempt appends one [`CallOutcome`]. The first success wins.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use llm_relay::prelude::*;
//!
//! let store = Arc::new(InMemoryConfigStore::from_json(include_str!("providers.json"))?);
//! let dispatcher = Dispatcher::builder()
//!     .store(store)
//!     .outcome_log(Arc::new(TracingOutcomeLog))
//!     .build()?;
//!
//! let result = dispatcher
//!     .call(CallRequest::new(vec![ChatMessage::user("Summarize this")]).with_task("summarize"))
//!     .await?;
//! println!("{} answered: {}", result.provider_id, result.content);
//! ```

mod state;
mod stream;

pub use state::DispatchState;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::adapters::ProviderAdapter;
use crate::credentials::{CredentialCipher, PlaintextCipher};
use crate::error::LlmError;
use crate::registry::AdapterRegistry;
use crate::resolver::{ConfigResolver, ResolvedTarget};
use crate::retry::RetryPolicy;
use crate::settings::DispatchSettings;
use crate::store::{ConfigStore, OutcomeLog, TracingOutcomeLog};
use crate::streaming::{DispatchStream, TextEvent, TextStream};
use crate::types::{AttemptContext, AvailabilityReport, CallOutcome, CallRequest, CallResult};

/// Append an outcome; failures are logged and swallowed.
pub(crate) async fn record_outcome(log: &dyn OutcomeLog, outcome: &CallOutcome) {
    if let Err(e) = log.append_call_outcome(outcome).await {
        debug!(
            request_id = %outcome.request_id,
            provider_id = %outcome.provider_id,
            error = %e,
            "failed to record call outcome"
        );
    }
}

/// How an attempt talks to the adapter and what it hands back.
#[async_trait]
trait AttemptMode: Send + Sync {
    type Output: Send;

    /// Run one attempt. Successes are recorded here; the caller records
    /// failures.
    async fn run(
        &self,
        dispatcher: &Dispatcher,
        request: &CallRequest,
        target: &ResolvedTarget,
        ctx: &AttemptContext,
        started: Instant,
    ) -> Result<Self::Output, LlmError>;
}

struct Buffered;

#[async_trait]
impl AttemptMode for Buffered {
    type Output = CallResult;

    async fn run(
        &self,
        dispatcher: &Dispatcher,
        request: &CallRequest,
        target: &ResolvedTarget,
        ctx: &AttemptContext,
        started: Instant,
    ) -> Result<CallResult, LlmError> {
        let result = dispatcher.call_once(request, target).await?;
        record_outcome(
            dispatcher.outcomes.as_ref(),
            &ctx.success(result.usage, started.elapsed()),
        )
        .await;
        Ok(result)
    }
}

struct Streaming;

#[async_trait]
impl AttemptMode for Streaming {
    type Output = DispatchStream;

    async fn run(
        &self,
        dispatcher: &Dispatcher,
        request: &CallRequest,
        target: &ResolvedTarget,
        ctx: &AttemptContext,
        started: Instant,
    ) -> Result<DispatchStream, LlmError> {
        let (first, rest) = dispatcher.open_once(request, target).await?;
        // the committed stream records the outcome itself
        Ok(stream::committed_stream(
            first,
            rest,
            ctx.clone(),
            started,
            dispatcher.outcomes.clone(),
        ))
    }
}

/// Multi-provider dispatcher
pub struct Dispatcher {
    resolver: ConfigResolver,
    registry: AdapterRegistry,
    outcomes: Arc<dyn OutcomeLog>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        outcomes: Arc<dyn OutcomeLog>,
        cipher: Arc<dyn CredentialCipher>,
        settings: DispatchSettings,
    ) -> Result<Self, LlmError> {
        let registry = AdapterRegistry::new(
            store.clone(),
            cipher,
            &settings.http,
            settings.cache_capacity(),
        )?;
        Ok(Self {
            resolver: ConfigResolver::new(store),
            registry,
            outcomes,
            policy: settings.retry_policy(),
        })
    }

    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Buffered call with retry and failover.
    pub async fn call(&self, request: CallRequest) -> Result<CallResult, LlmError> {
        self.dispatch(&request, &Buffered).await
    }

    /// Streaming call.
    ///
    /// Retry and failover apply only until an attempt yields its first event.
    /// After that, a failure ends the returned stream with an error and
    /// nothing is re-sent.
    pub async fn stream_call(&self, request: CallRequest) -> Result<DispatchStream, LlmError> {
        self.dispatch(&request, &Streaming).await
    }

    /// Probe one provider.
    pub async fn check_provider(
        &self,
        provider_id: &str,
        model: Option<&str>,
    ) -> Result<AvailabilityReport, LlmError> {
        let started = Instant::now();
        match self.registry.get(provider_id).await {
            Ok(adapter) => Ok(adapter.check_availability(model).await),
            Err(e @ LlmError::ConfigurationError(_)) => Err(e),
            Err(e) => Ok(AvailabilityReport::unavailable(started.elapsed(), &e)),
        }
    }

    /// Probe every enabled provider concurrently.
    pub async fn check_all(&self) -> Result<Vec<(String, AvailabilityReport)>, LlmError> {
        let providers = self.resolver.store().list_provider_configs().await?;
        let checks = providers.iter().filter(|p| p.enabled).map(|p| async move {
            let started = Instant::now();
            let report = match self.check_provider(&p.id, None).await {
                Ok(report) => report,
                Err(e) => AvailabilityReport::unavailable(started.elapsed(), &e),
            };
            (p.id.clone(), report)
        });
        Ok(join_all(checks).await)
    }

    pub async fn list_models(&self, provider_id: &str) -> Result<Vec<String>, LlmError> {
        self.registry.get(provider_id).await?.list_models().await
    }

    /// Drop cached adapters (one provider, or all) and cached task routes.
    pub async fn on_config_changed(&self, provider_id: Option<&str>) {
        match provider_id {
            Some(id) => self.registry.invalidate(id).await,
            None => self.registry.invalidate_all().await,
        }
        self.resolver.invalidate_routes().await;
    }

    pub async fn on_route_changed(&self, task_name: &str) {
        self.resolver.invalidate_route(task_name).await;
    }

    async fn dispatch<M: AttemptMode>(
        &self,
        request: &CallRequest,
        mode: &M,
    ) -> Result<M::Output, LlmError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let primary = self.resolver.resolve(request).await?;
        debug!(
            request_id = %request_id,
            provider_id = %primary.provider.id,
            model = %primary.model,
            "dispatching"
        );

        let mut state = DispatchState::Resolving.resolved();
        let mut attempts: u32 = 0;
        let mut last_error: Option<LlmError> = None;
        let mut candidates = Vec::new();

        loop {
            match state {
                DispatchState::AttemptingPrimary { .. } => {
                    attempts += 1;
                    match self
                        .attempt(&request_id, request, &primary, attempts, false, mode)
                        .await
                    {
                        Ok(done) => {
                            state = state.succeeded();
                            debug!(request_id = %request_id, ?state, attempts, "dispatch finished");
                            return Ok(done);
                        }
                        Err(e) => {
                            state = state.primary_failed(&e, &self.policy);
                            last_error = Some(e);
                        }
                    }
                }
                DispatchState::RetryingPrimary { delay, .. } => {
                    debug!(request_id = %request_id, ?delay, "retrying primary provider");
                    wait(delay).await;
                    state = state.backoff_elapsed();
                }
                DispatchState::FailingOverToNext => {
                    let error = last_error
                        .clone()
                        .unwrap_or_else(|| LlmError::configuration("failover without an error"));
                    candidates = self
                        .resolver
                        .fallback_candidates(&primary.provider, &error)
                        .await?;
                    if !candidates.is_empty() {
                        warn!(
                            request_id = %request_id,
                            failed = %primary.provider.id,
                            candidates = candidates.len(),
                            error = %error,
                            "primary provider exhausted, failing over"
                        );
                    }
                    state = state.candidates_ready(candidates.len());
                }
                DispatchState::AttemptingFallback { index } => {
                    let candidate = candidates[index].clone();
                    match self.resolver.resolve_fallback(candidate, request) {
                        Ok(target) => {
                            attempts += 1;
                            match self
                                .attempt(&request_id, request, &target, attempts, true, mode)
                                .await
                            {
                                Ok(done) => {
                                    state = state.succeeded();
                                    info!(
                                        ?state,
                                        request_id = %request_id,
                                        provider_id = %target.provider.id,
                                        "fallback provider succeeded"
                                    );
                                    return Ok(done);
                                }
                                Err(e) => last_error = Some(e),
                            }
                        }
                        Err(e) => {
                            debug!(request_id = %request_id, error = %e, "skipping unusable fallback candidate");
                        }
                    }
                    state = state.fallback_failed(candidates.len());
                }
                DispatchState::Failed => {
                    return Err(last_error
                        .unwrap_or_else(|| LlmError::configuration("dispatch failed without an error")));
                }
                DispatchState::Exhausted => {
                    let last = last_error
                        .unwrap_or_else(|| LlmError::configuration("no provider attempted"));
                    warn!(request_id = %request_id, attempts, error = %last, "all providers exhausted");
                    return Err(LlmError::AllProvidersExhausted {
                        attempts: attempts as usize,
                        last: Box::new(last),
                    });
                }
                DispatchState::Resolving | DispatchState::Succeeded => {
                    return Err(LlmError::configuration(format!(
                        "dispatcher reached unexpected state {state:?}"
                    )));
                }
            }
        }
    }

    /// One attempt against one target.
    async fn attempt<M: AttemptMode>(
        &self,
        request_id: &str,
        request: &CallRequest,
        target: &ResolvedTarget,
        attempt: u32,
        fallback: bool,
        mode: &M,
    ) -> Result<M::Output, LlmError> {
        let ctx = AttemptContext {
            request_id: request_id.to_string(),
            provider_id: target.provider.id.clone(),
            model: target.model.clone(),
            task_name: request.task_name.clone(),
            attempt,
            fallback,
        };
        let started = Instant::now();

        let result = mode.run(self, request, target, &ctx, started).await;
        if let Err(e) = &result {
            debug!(
                request_id = %request_id,
                provider_id = %target.provider.id,
                attempt,
                error = %e,
                "attempt failed"
            );
            record_outcome(self.outcomes.as_ref(), &ctx.failure(e, started.elapsed())).await;
        }
        result
    }

    async fn call_once(
        &self,
        request: &CallRequest,
        target: &ResolvedTarget,
    ) -> Result<CallResult, LlmError> {
        let adapter = self.registry.get_for(&target.provider).await?;
        adapter
            .call(&request.messages, &target.model, &target.params)
            .await
    }

    /// Open a stream and read up to its first event, within the attempt
    /// deadline.
    async fn open_once(
        &self,
        request: &CallRequest,
        target: &ResolvedTarget,
    ) -> Result<(TextEvent, TextStream), LlmError> {
        let deadline = target
            .params
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.registry.default_timeout());
        let opened = async {
            let adapter = self.registry.get_for(&target.provider).await?;
            let mut stream = adapter
                .stream_call(&request.messages, &target.model, &target.params)
                .await?;
            match stream.next().await {
                Some(Ok(first)) => Ok((first, stream)),
                Some(Err(e)) => Err(e),
                None => Err(LlmError::StreamError(
                    "stream closed before the first event".into(),
                )),
            }
        };
        tokio::time::timeout(deadline, opened)
            .await
            .unwrap_or(Err(LlmError::TimeoutError(deadline)))
    }
}

async fn wait(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

/// Builder for [`Dispatcher`]
#[derive(Default)]
pub struct DispatcherBuilder {
    store: Option<Arc<dyn ConfigStore>>,
    outcomes: Option<Arc<dyn OutcomeLog>>,
    cipher: Option<Arc<dyn CredentialCipher>>,
    settings: Option<DispatchSettings>,
}

impl DispatcherBuilder {
    pub fn store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to [`TracingOutcomeLog`].
    pub fn outcome_log(mut self, outcomes: Arc<dyn OutcomeLog>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    /// Defaults to [`PlaintextCipher`].
    pub fn cipher(mut self, cipher: Arc<dyn CredentialCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        let settings = self.settings.get_or_insert_with(DispatchSettings::default);
        settings.retry.max_attempts = policy.max_attempts;
        settings.retry.initial_delay_ms = policy.initial_delay.as_millis() as u64;
        settings.retry.max_delay_ms = policy.max_delay.as_millis() as u64;
        settings.retry.backoff = policy.backoff;
        settings.retry.multiplier = policy.backoff_multiplier;
        settings.retry.jitter = policy.use_jitter;
        settings.retry.fail_fast_on_auth = policy.fail_fast_on_auth;
        self
    }

    pub fn build(self) -> Result<Dispatcher, LlmError> {
        let store = self
            .store
            .ok_or_else(|| LlmError::configuration("a configuration store is required"))?;
        Dispatcher::new(
            store,
            self.outcomes.unwrap_or_else(|| Arc::new(TracingOutcomeLog)),
            self.cipher.unwrap_or_else(|| Arc::new(PlaintextCipher)),
            self.settings.unwrap_or_default(),
        )
    }
}
