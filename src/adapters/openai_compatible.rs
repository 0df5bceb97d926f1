//! Chat-completions adapter
//!
//! One implementation serves every vendor speaking the OpenAI
//! chat-completions wire format. Vendors differ only in the knobs collected
//! in [`CompatProfile`]: how the key is presented, how the URL is shaped and
//! whether a model listing endpoint exists.

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::time::Duration;

use super::base::{HeaderBuilder, HttpBase, apply_params};
use super::ProviderAdapter;
use crate::error::LlmError;
use crate::streaming::{DeltaPath, TextStream, decode_text_stream};
use crate::types::{CallParameters, CallResult, ChatMessage, ProviderConfig, ProviderKind, Usage};

/// Azure `api-version` used when the provider does not set one.
pub const AZURE_DEFAULT_API_VERSION: &str = "2024-10-21";

/// Deployments offered when an Azure provider has no catalog.
const AZURE_KNOWN_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4.1", "gpt-4.1-mini"];

/// How the credential travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Key in a vendor header, verbatim
    ApiKeyHeader(&'static str),
    /// No credential at all
    None,
}

/// Per-vendor differences within the chat-completions format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatProfile {
    pub auth: AuthScheme,
    /// `/openai/deployments/{model}/chat/completions?api-version=...`
    pub deployment_urls: bool,
    /// `GET {base}/models` is available
    pub remote_listing: bool,
}

impl CompatProfile {
    pub const fn for_kind(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Azure => Self {
                auth: AuthScheme::ApiKeyHeader("api-key"),
                deployment_urls: true,
                remote_listing: false,
            },
            ProviderKind::Ollama => Self {
                auth: AuthScheme::None,
                deployment_urls: false,
                remote_listing: true,
            },
            _ => Self {
                auth: AuthScheme::Bearer,
                deployment_urls: false,
                remote_listing: true,
            },
        }
    }
}

/// Adapter for OpenAI-compatible vendors
#[derive(Debug)]
pub struct OpenAiCompatibleAdapter {
    base: HttpBase,
    profile: CompatProfile,
    api_version: String,
    catalog: Vec<String>,
}

impl OpenAiCompatibleAdapter {
    pub fn new(
        config: &ProviderConfig,
        api_key: Option<SecretString>,
        client: reqwest::Client,
        default_timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            base: HttpBase::new(config, api_key, client, default_timeout)?,
            profile: CompatProfile::for_kind(config.kind),
            api_version: config
                .api_version
                .clone()
                .unwrap_or_else(|| AZURE_DEFAULT_API_VERSION.to_string()),
            catalog: config.models.clone(),
        })
    }

    pub fn profile(&self) -> CompatProfile {
        self.profile
    }

    fn chat_url(&self, model: &str) -> String {
        if self.profile.deployment_urls {
            format!(
                "{}?api-version={}",
                self.base
                    .url(&format!("openai/deployments/{model}/chat/completions")),
                self.api_version
            )
        } else {
            self.base.url("chat/completions")
        }
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap, LlmError> {
        let builder = HeaderBuilder::json();
        let builder = match self.profile.auth {
            AuthScheme::Bearer => builder.bearer(self.base.require_key()?)?,
            AuthScheme::ApiKeyHeader(name) => builder.header(name, self.base.require_key()?)?,
            // a key configured anyway is still forwarded
            AuthScheme::None => match self.base.api_key() {
                Some(key) => builder.bearer(key)?,
                None => builder,
            },
        };
        Ok(builder.build())
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &CallParameters,
        stream: bool,
    ) -> Value {
        let mut body = serde_json::Map::new();
        body.insert("model".into(), json!(model));
        body.insert(
            "messages".into(),
            Value::Array(
                messages
                    .iter()
                    .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
                    .collect(),
            ),
        );
        if stream {
            body.insert("stream".into(), json!(true));
        }
        apply_params(&mut body, params, "stop");
        Value::Object(body)
    }

    fn parse_response(&self, model: &str, response: &Value) -> Result<CallResult, LlmError> {
        let content = response
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                LlmError::ProtocolError(format!(
                    "provider={} response has no choices[0].message.content",
                    self.base.provider_id()
                ))
            })?;

        let usage = response.get("usage").filter(|u| u.is_object()).map(|u| {
            Usage::new(
                u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or_default() as u32,
                u.get("completion_tokens").and_then(Value::as_u64).unwrap_or_default() as u32,
            )
        });

        Ok(CallResult {
            content: content.to_string(),
            model: model.to_string(),
            provider_id: self.base.provider_id().to_string(),
            usage,
        })
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn provider_id(&self) -> &str {
        self.base.provider_id()
    }

    fn default_model(&self) -> Option<&str> {
        self.catalog.first().map(String::as_str)
    }

    fn supports_remote_listing(&self) -> bool {
        self.profile.remote_listing
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        if !self.profile.remote_listing {
            if !self.catalog.is_empty() {
                return Ok(self.catalog.clone());
            }
            return Ok(AZURE_KNOWN_MODELS.iter().map(|m| m.to_string()).collect());
        }

        let timeout = self.base.timeout_for(&self.base.merge_params(&CallParameters::default()));
        let response = self
            .base
            .get_json(&self.base.url("models"), self.headers()?, timeout)
            .await?;
        let data = response
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                LlmError::ProtocolError(format!(
                    "provider={} model listing has no data array",
                    self.base.provider_id()
                ))
            })?;
        Ok(data
            .iter()
            .filter_map(|m| m.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    async fn call(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &CallParameters,
    ) -> Result<CallResult, LlmError> {
        let params = self.base.merge_params(params);
        let body = self.request_body(messages, model, &params, false);
        let response = self
            .base
            .post_json(
                &self.chat_url(model),
                self.headers()?,
                &body,
                self.base.timeout_for(&params),
            )
            .await?;
        self.parse_response(model, &response)
    }

    async fn stream_call(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &CallParameters,
    ) -> Result<TextStream, LlmError> {
        let params = self.base.merge_params(params);
        let body = self.request_body(messages, model, &params, true);
        let response = self
            .base
            .open_stream(
                &self.chat_url(model),
                self.headers()?,
                &body,
                self.base.timeout_for(&params),
            )
            .await?;
        Ok(decode_text_stream(
            response.bytes_stream(),
            DeltaPath::ChoicesDeltaContent,
        ))
    }
}
