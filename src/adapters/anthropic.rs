//! Anthropic Messages adapter

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::time::Duration;

use super::base::{HeaderBuilder, HttpBase, apply_params};
use super::ProviderAdapter;
use crate::error::LlmError;
use crate::streaming::{DeltaPath, TextStream, decode_text_stream};
use crate::types::{CallParameters, CallResult, ChatMessage, MessageRole, ProviderConfig, Usage};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// The Messages API requires `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic has no model listing endpoint under this adapter.
const KNOWN_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-3-7-sonnet-latest",
    "claude-3-5-haiku-latest",
];

#[derive(Debug)]
pub struct AnthropicAdapter {
    base: HttpBase,
    catalog: Vec<String>,
}

impl AnthropicAdapter {
    pub fn new(
        config: &ProviderConfig,
        api_key: Option<SecretString>,
        client: reqwest::Client,
        default_timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            base: HttpBase::new(config, api_key, client, default_timeout)?,
            catalog: config.models.clone(),
        })
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap, LlmError> {
        Ok(HeaderBuilder::json()
            .header("x-api-key", self.base.require_key()?)?
            .header("anthropic-version", ANTHROPIC_VERSION)?
            .build())
    }

    fn request_body(
        &self,
        messages: &[ChatMessage],
        model: &str,
        params: &CallParameters,
        stream: bool,
    ) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::Map::new();
        body.insert("model".into(), json!(model));
        if !system.is_empty() {
            body.insert("system".into(), json!(system.join("\n\n")));
        }
        body.insert("messages".into(), Value::Array(turns));
        body.insert(
            "max_tokens".into(),
            json!(params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        if stream {
            body.insert("stream".into(), json!(true));
        }
        apply_params(&mut body, params, "stop_sequences");
        Value::Object(body)
    }

    fn parse_response(&self, model: &str, response: &Value) -> Result<CallResult, LlmError> {
        let blocks = response
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                LlmError::ProtocolError(format!(
                    "provider={} response has no content array",
                    self.base.provider_id()
                ))
            })?;
        let content: String = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect();

        let usage = response.get("usage").filter(|u| u.is_object()).map(|u| {
            Usage::new(
                u.get("input_tokens").and_then(Value::as_u64).unwrap_or_default() as u32,
                u.get("output_tokens").and_then(Value::as_u64).unwrap_or_default() as u32,
            )
        });

        Ok(CallResult {
            content,
            model: model.to_string(),
            provider_id: self.base.provider_id().to_string(),
            usage,
        })
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider_id(&self) -> &str {
        self.base.provider_id()
    }

    fn default_model(&self) -> Option<&str> {
        self.catalog
            .first()
            .map(String::as_str)
            .or_else(|| KNOWN_MODELS.first().copied())
    }

    fn supports_remote_listing(&self) -> bool {
        false
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        if !self.catalog.is_empty() {
            return Ok(self.catalog.clone());
        }
        Ok(KNOWN_MODELS.iter().map(|m| m.to_string()).collect())
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
                &self.base.url("messages"),
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
                &self.base.url("messages"),
                self.headers()?,
                &body,
                self.base.timeout_for(&params),
            )
            .await?;
        Ok(decode_text_stream(
            response.bytes_stream(),
            DeltaPath::ContentBlockDeltaText,
        ))
    }
}
