//! Provider adapters
//!
//! Every vendor is reached through the uniform [`ProviderAdapter`] contract.
//! The concrete implementation is chosen by [`ProviderKind`](crate::types::ProviderKind) alone and held
//! in the closed [`AdapterKind`] enum; there is no open-ended lookup.

use async_trait::async_trait;
use secrecy::SecretString;
use std::time::{Duration, Instant};

use crate::error::LlmError;
use crate::streaming::TextStream;
use crate::types::{
    AvailabilityReport, CallParameters, CallResult, ChatMessage, ProviderConfig, WireFormat,
};

mod anthropic;
mod base;
mod openai_compatible;

pub use anthropic::{ANTHROPIC_VERSION, AnthropicAdapter};
pub use base::{HeaderBuilder, HttpBase};
pub use openai_compatible::{
    AZURE_DEFAULT_API_VERSION, AuthScheme, CompatProfile, OpenAiCompatibleAdapter,
};

/// Prompt used by availability probes.
const PROBE_PROMPT: &str = "ping";

/// Uniform capability set implemented per wire format
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Model used when a probe names none.
    fn default_model(&self) -> Option<&str>;

    /// Whether [`ProviderAdapter::list_models`] hits the network.
    fn supports_remote_listing(&self) -> bool;

    async fn list_models(&self) -> Result<Vec<String>, LlmError>;

    async fn call(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &CallParameters,
    ) -> Result<CallResult, LlmError>;

    /// Open a stream. Resolves once response headers arrive; the text
    /// follows through the returned stream.
    async fn stream_call(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &CallParameters,
    ) -> Result<TextStream, LlmError>;

    /// Prove reachability and credential validity.
    ///
    /// Without a model, vendors with a listing endpoint are probed through it;
    /// everything else gets a one-token call.
    async fn check_availability(&self, model: Option<&str>) -> AvailabilityReport {
        let started = Instant::now();
        let result = match (model, self.supports_remote_listing()) {
            (None, true) => self.list_models().await.map(Some),
            (requested, _) => match requested.or_else(|| self.default_model()) {
                Some(model) => {
                    let params = CallParameters::new().with_max_tokens(1);
                    self.call(&[ChatMessage::user(PROBE_PROMPT)], model, &params)
                        .await
                        .map(|_| None)
                }
                None => Err(LlmError::configuration(format!(
                    "provider '{}' has no model to probe",
                    self.provider_id()
                ))),
            },
        };
        match result {
            Ok(models) => AvailabilityReport::available(started.elapsed(), models),
            Err(e) => AvailabilityReport::unavailable(started.elapsed(), &e),
        }
    }
}

/// Closed set of adapter implementations
#[derive(Debug)]
pub enum AdapterKind {
    OpenAiCompatible(OpenAiCompatibleAdapter),
    Anthropic(AnthropicAdapter),
}

impl AdapterKind {
    /// Build the adapter for `config`. `api_key` is the decrypted credential.
    pub fn build(
        config: &ProviderConfig,
        api_key: Option<SecretString>,
        client: reqwest::Client,
        default_timeout: Duration,
    ) -> Result<Self, LlmError> {
        match config.kind.wire_format() {
            WireFormat::ChatCompletions => Ok(Self::OpenAiCompatible(
                OpenAiCompatibleAdapter::new(config, api_key, client, default_timeout)?,
            )),
            WireFormat::AnthropicMessages => Ok(Self::Anthropic(AnthropicAdapter::new(
                config,
                api_key,
                client,
                default_timeout,
            )?)),
        }
    }

    fn inner(&self) -> &dyn ProviderAdapter {
        match self {
            Self::OpenAiCompatible(a) => a,
            Self::Anthropic(a) => a,
        }
    }
}

#[async_trait]
impl ProviderAdapter for AdapterKind {
    fn provider_id(&self) -> &str {
        self.inner().provider_id()
    }

    fn default_model(&self) -> Option<&str> {
        self.inner().default_model()
    }

    fn supports_remote_listing(&self) -> bool {
        self.inner().supports_remote_listing()
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        self.inner().list_models().await
    }

    async fn call(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &CallParameters,
    ) -> Result<CallResult, LlmError> {
        self.inner().call(messages, model, params).await
    }

    async fn stream_call(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &CallParameters,
    ) -> Result<TextStream, LlmError> {
        self.inner().stream_call(messages, model, params).await
    }

    async fn check_availability(&self, model: Option<&str>) -> AvailabilityReport {
        self.inner().check_availability(model).await
    }
}
