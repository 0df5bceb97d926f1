//! Shared HTTP plumbing for adapters
//!
//! Per-attempt deadlines, status classification and parameter merging live
//! here so vendor adapters only describe their envelopes and headers.

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{LlmError, classify_http_error};
use crate::types::{CallParameters, ProviderConfig};

/// Connection details shared by every adapter
pub struct HttpBase {
    provider_id: String,
    base_url: String,
    client: reqwest::Client,
    api_key: Option<SecretString>,
    defaults: CallParameters,
    default_timeout: Duration,
}

impl std::fmt::Debug for HttpBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBase")
            .field("provider_id", &self.provider_id)
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

impl HttpBase {
    pub fn new(
        config: &ProviderConfig,
        api_key: Option<SecretString>,
        client: reqwest::Client,
        default_timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            provider_id: config.id.clone(),
            base_url: config.effective_base_url()?,
            client,
            api_key,
            defaults: config.defaults.clone(),
            default_timeout,
        })
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base_url}/{path}`
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Adapter defaults with call-site overrides on top.
    pub fn merge_params(&self, overrides: &CallParameters) -> CallParameters {
        self.defaults.merge(overrides)
    }

    pub fn timeout_for(&self, params: &CallParameters) -> Duration {
        params
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    /// Decrypted key, or an authentication error when the provider has none.
    pub fn require_key(&self) -> Result<&str, LlmError> {
        self.api_key
            .as_ref()
            .map(|k| k.expose_secret())
            .ok_or_else(|| {
                LlmError::AuthenticationError(format!(
                    "provider={} has no credential configured",
                    self.provider_id
                ))
            })
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret())
    }

    /// POST a JSON body and parse a JSON response within `timeout`.
    pub async fn post_json(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, LlmError> {
        self.with_deadline(timeout, async {
            let response = self
                .client
                .post(url)
                .headers(headers)
                .json(body)
                .send()
                .await?;
            let response = self.ensure_success(response).await?;
            Ok(response.json::<Value>().await?)
        })
        .await
    }

    pub async fn get_json(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<Value, LlmError> {
        self.with_deadline(timeout, async {
            let response = self.client.get(url).headers(headers).send().await?;
            let response = self.ensure_success(response).await?;
            Ok(response.json::<Value>().await?)
        })
        .await
    }

    /// Open a streaming POST. The deadline covers the request up to the
    /// response headers; the body is read by the caller.
    pub async fn open_stream(
        &self,
        url: &str,
        headers: HeaderMap,
        body: &Value,
        timeout: Duration,
    ) -> Result<reqwest::Response, LlmError> {
        self.with_deadline(timeout, async {
            let response = self
                .client
                .post(url)
                .headers(headers)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(body)
                .send()
                .await?;
            self.ensure_success(response).await
        })
        .await
    }

    async fn with_deadline<T, F>(&self, timeout: Duration, fut: F) -> Result<T, LlmError>
    where
        F: std::future::Future<Output = Result<T, LlmError>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!(provider_id = %self.provider_id, ?timeout, "attempt deadline elapsed");
                Err(LlmError::TimeoutError(timeout))
            }
        }
    }

    async fn ensure_success(
        &self,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_http_error(
            &self.provider_id,
            status.as_u16(),
            &body,
        ))
    }
}

/// Header map builder, in the spirit of a request builder.
#[derive(Debug, Default)]
pub struct HeaderBuilder {
    headers: HeaderMap,
}

impl HeaderBuilder {
    pub fn json() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self { headers }
    }

    pub fn bearer(self, token: &str) -> Result<Self, LlmError> {
        self.header("authorization", &format!("Bearer {token}"))
    }

    pub fn header(mut self, name: &str, value: &str) -> Result<Self, LlmError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            LlmError::configuration(format!("invalid header name '{name}': {e}"))
        })?;
        // values may be credentials, keep them out of the message
        let value = HeaderValue::from_str(value).map_err(|_| {
            LlmError::configuration(format!("invalid value for header '{name}'"))
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn build(self) -> HeaderMap {
        self.headers
    }
}

/// Flatten typed and extra parameters into a request body.
///
/// `stop_key` is the vendor's name for stop sequences.
pub fn apply_params(body: &mut serde_json::Map<String, Value>, params: &CallParameters, stop_key: &str) {
    if let Some(t) = params.temperature {
        body.insert("temperature".into(), Value::from(t));
    }
    if let Some(m) = params.max_tokens {
        body.insert("max_tokens".into(), Value::from(m));
    }
    if let Some(p) = params.top_p {
        body.insert("top_p".into(), Value::from(p));
    }
    if let Some(stop) = params.stop_sequences.as_ref().filter(|s| !s.is_empty()) {
        body.insert(stop_key.into(), Value::from(stop.clone()));
    }
    for (k, v) in &params.extra {
        body.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderKind;
    use serde_json::json;

    fn base(defaults: CallParameters) -> HttpBase {
        let config = ProviderConfig::new("p", ProviderKind::GenericCompletions)
            .with_base_url("http://localhost:1/v1/")
            .with_defaults(defaults);
        HttpBase::new(
            &config,
            None,
            reqwest::Client::new(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let b = base(CallParameters::default());
        assert_eq!(b.url("/chat/completions"), "http://localhost:1/v1/chat/completions");
    }

    #[test]
    fn call_site_overrides_win_and_timeout_falls_back() {
        let b = base(CallParameters::new().with_temperature(0.1).with_max_tokens(9));
        let merged = b.merge_params(&CallParameters::new().with_temperature(0.7));
        assert_eq!(merged.temperature, Some(0.7));
        assert_eq!(merged.max_tokens, Some(9));
        assert_eq!(b.timeout_for(&merged), Duration::from_secs(5));
    }

    #[test]
    fn missing_key_is_an_authentication_error() {
        let err = base(CallParameters::default()).require_key().unwrap_err();
        assert!(matches!(err, LlmError::AuthenticationError(_)));
    }

    #[test]
    fn params_flatten_into_body() {
        let mut body = serde_json::Map::new();
        let params = CallParameters::new()
            .with_max_tokens(3)
            .with_stop_sequences(vec!["END".into()])
            .with_extra("seed", json!(42));
        apply_params(&mut body, &params, "stop");
        assert_eq!(
            Value::Object(body),
            json!({"max_tokens": 3, "stop": ["END"], "seed": 42})
        );
    }
}
