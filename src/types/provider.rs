//! Provider configuration and task routes
//!
//! Both are read-only snapshots as far as the dispatcher is concerned; they
//! are created and edited through a [`crate::store::ConfigStore`].

use serde::{Deserialize, Serialize};

use super::CallParameters;
use crate::error::LlmError;

/// Vendor kind (closed set)
///
/// The kind alone decides which adapter implementation serves a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "deepseek")]
    DeepSeek,
    Groq,
    Together,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Ollama,
    /// Any endpoint speaking the chat-completions wire format
    GenericCompletions,
    Azure,
    Anthropic,
}

/// Request/response envelope family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Flat message list, `choices[0]` responses, bearer or api-key auth
    ChatCompletions,
    /// Separate `system` field, content-block responses, `x-api-key` auth
    AnthropicMessages,
}

impl ProviderKind {
    pub const fn wire_format(&self) -> WireFormat {
        match self {
            Self::Anthropic => WireFormat::AnthropicMessages,
            _ => WireFormat::ChatCompletions,
        }
    }

    /// Vendor default endpoint, when the vendor has a public one.
    pub const fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::DeepSeek => Some("https://api.deepseek.com/v1"),
            Self::Groq => Some("https://api.groq.com/openai/v1"),
            Self::Together => Some("https://api.together.xyz/v1"),
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::Ollama => Some("http://localhost:11434/v1"),
            Self::Anthropic => Some("https://api.anthropic.com/v1"),
            Self::GenericCompletions | Self::Azure => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Groq => "groq",
            Self::Together => "together",
            Self::OpenRouter => "openrouter",
            Self::Ollama => "ollama",
            Self::GenericCompletions => "generic-completions",
            Self::Azure => "azure",
            Self::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured provider
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: ProviderKind,
    /// Empty means "use the vendor default"
    #[serde(default)]
    pub base_url: String,
    /// Opaque (encrypted) credential reference
    #[serde(default)]
    pub credential: Option<String>,
    /// Model catalog; the first entry is the provider's default model
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub defaults: CallParameters,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_default: bool,
    /// Lower values are tried first
    #[serde(default)]
    pub priority: i32,
    /// Azure `api-version` query parameter
    #[serde(default)]
    pub api_version: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, kind: ProviderKind) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            base_url: String::new(),
            credential: None,
            models: Vec::new(),
            defaults: CallParameters::default(),
            enabled: true,
            is_default: false,
            priority: 0,
            api_version: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_defaults(mut self, defaults: CallParameters) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// First catalog entry.
    pub fn default_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }

    /// Configured base URL, falling back to the vendor default.
    pub fn effective_base_url(&self) -> Result<String, LlmError> {
        let configured = self.base_url.trim();
        if !configured.is_empty() {
            return Ok(configured.trim_end_matches('/').to_string());
        }
        self.kind
            .default_base_url()
            .map(str::to_string)
            .ok_or_else(|| {
                LlmError::configuration(format!(
                    "provider '{}' ({}) has no base URL",
                    self.id, self.kind
                ))
            })
    }

    /// Two providers share a credential scope when they present the same
    /// credential to the same endpoint.
    pub fn shares_credential_scope(&self, other: &ProviderConfig) -> bool {
        self.credential.is_some()
            && self.credential == other.credential
            && self.effective_base_url().ok() == other.effective_base_url().ok()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field(
                "credential",
                &self.credential.as_deref().map(crate::credentials::mask_secret),
            )
            .field("models", &self.models)
            .field("defaults", &self.defaults)
            .field("enabled", &self.enabled)
            .field("is_default", &self.is_default)
            .field("priority", &self.priority)
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// Named binding from a logical task to a preferred provider/model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRoute {
    pub task_name: String,
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub overrides: CallParameters,
}

impl TaskRoute {
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_their_wire_names() {
        let kind: ProviderKind = serde_json::from_str("\"generic-completions\"").unwrap();
        assert_eq!(kind, ProviderKind::GenericCompletions);
        let kind: ProviderKind = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenAi);
        assert_eq!(ProviderKind::Azure.wire_format(), WireFormat::ChatCompletions);
        assert_eq!(
            ProviderKind::Anthropic.wire_format(),
            WireFormat::AnthropicMessages
        );
    }

    #[test]
    fn base_url_falls_back_to_vendor_default() {
        let cfg = ProviderConfig::new("a", ProviderKind::OpenAi);
        assert_eq!(cfg.effective_base_url().unwrap(), "https://api.openai.com/v1");

        let cfg = cfg.with_base_url("http://localhost:8080/v1/");
        assert_eq!(cfg.effective_base_url().unwrap(), "http://localhost:8080/v1");

        let err = ProviderConfig::new("z", ProviderKind::Azure)
            .effective_base_url()
            .unwrap_err();
        assert!(matches!(err, LlmError::ConfigurationError(_)));
    }

    #[test]
    fn debug_output_masks_the_credential() {
        let cfg = ProviderConfig::new("a", ProviderKind::OpenAi)
            .with_credential("sk-abcdefghijklmnopqrstuvwxyz");
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("sk-abcdefghijklmnopqrstuvwxyz"));
    }

    #[test]
    fn credential_scope_requires_same_key_and_endpoint() {
        let a = ProviderConfig::new("a", ProviderKind::OpenAi).with_credential("k");
        let b = ProviderConfig::new("b", ProviderKind::OpenAi).with_credential("k");
        let c = ProviderConfig::new("c", ProviderKind::Groq).with_credential("k");
        assert!(a.shares_credential_scope(&b));
        assert!(!a.shares_credential_scope(&c));
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: ProviderConfig =
            serde_json::from_str(r#"{"id":"x","kind":"anthropic","models":["m"]}"#).unwrap();
        assert!(cfg.enabled);
        assert!(!cfg.is_default);
        assert_eq!(cfg.default_model(), Some("m"));
    }
}
