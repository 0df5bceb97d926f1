//! Error Handling Module
//!
//! A single error type, [`LlmError`], is surfaced by every public operation.
//! Variants are grouped into coarse [`ErrorKind`]s so callers can tell
//! "fix your configuration" apart from "try again later" without matching on
//! every variant.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm_relay::error::{ErrorKind, LlmError};
//!
//! let error = LlmError::transport(Some(503), "upstream unavailable");
//! assert_eq!(error.kind(), ErrorKind::Transport);
//! assert!(error.is_retryable());
//! ```

use std::time::Duration;

use reqwest::StatusCode;

/// Maximum number of body characters kept in error messages.
const BODY_SAMPLE_LEN: usize = 200;

/// Coarse error classification used by the dispatcher's retry/failover policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Authentication,
    Transport,
    Protocol,
    Credential,
    Exhausted,
}

/// Errors produced by the dispatch layer
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// No resolvable provider/model, or a broken configuration store.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Bad or expired credential (HTTP 401/403).
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// Connection failure or non-2xx response.
    #[error("Transport error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    TransportError {
        status: Option<u16>,
        message: String,
    },

    /// The per-attempt deadline elapsed.
    #[error("Request timed out after {0:?}")]
    TimeoutError(Duration),

    /// Malformed response body.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A stored credential could not be decrypted.
    #[error("Credential error: {0}")]
    CredentialError(String),

    /// The stream failed after output had already been delivered.
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Every candidate provider failed; wraps the last concrete error.
    #[error("All providers exhausted after {attempts} attempt(s): {last}")]
    AllProvidersExhausted {
        attempts: usize,
        last: Box<LlmError>,
    },
}

impl LlmError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::ConfigurationError(message.into())
    }

    pub fn transport(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::TransportError {
            status,
            message: message.into(),
        }
    }

    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigurationError(_) => ErrorKind::Configuration,
            Self::AuthenticationError(_) => ErrorKind::Authentication,
            Self::TransportError { .. } | Self::TimeoutError(_) | Self::StreamError(_) => {
                ErrorKind::Transport
            }
            Self::ProtocolError(_) => ErrorKind::Protocol,
            Self::CredentialError(_) => ErrorKind::Credential,
            Self::AllProvidersExhausted { .. } => ErrorKind::Exhausted,
        }
    }

    /// Whether the same provider may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Authentication | ErrorKind::Transport | ErrorKind::Protocol
        )
    }

    /// Whether a different provider may be attempted after this error.
    pub fn allows_failover(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::Exhausted
        )
    }

    /// The most specific error underneath any exhaustion wrapper.
    pub fn root_cause(&self) -> &LlmError {
        match self {
            Self::AllProvidersExhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// HTTP status attached to the error, when there is one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::TransportError { status, .. } => *status,
            _ => None,
        }
    }
}

/// Classify a non-2xx response into a library error.
///
/// 401/403 become [`LlmError::AuthenticationError`]; any other status becomes a
/// [`LlmError::TransportError`] carrying the status. The message is taken from
/// the vendor's JSON error envelope when present, otherwise it is derived from
/// the status line.
pub fn classify_http_error(provider_id: &str, status: u16, body_text: &str) -> LlmError {
    let message = vendor_error_message(body_text).unwrap_or_else(|| {
        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown Status");
        format!("HTTP {status} {reason}")
    });
    let message = truncate(&message);

    match status {
        401 | 403 => LlmError::AuthenticationError(format!("provider={provider_id} {message}")),
        _ => LlmError::transport(Some(status), format!("provider={provider_id} {message}")),
    }
}

/// Pull a human-readable message out of the common vendor error envelopes:
/// `{"error":{"message":..}}`, `{"error":".."}` and `{"message":..}`.
fn vendor_error_message(body_text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body_text).ok()?;
    let from_error = match value.get("error") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(obj) => obj
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string),
        None => None,
    };
    from_error
        .or_else(|| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .filter(|m| !m.trim().is_empty())
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= BODY_SAMPLE_LEN {
        message.to_string()
    } else {
        let mut out: String = message.chars().take(BODY_SAMPLE_LEN).collect();
        out.push('…');
        out
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::transport(None, format!("request timed out: {err}"));
        }
        Self::transport(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::ProtocolError(err.to_string())
    }
}
