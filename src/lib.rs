//! # llm-relay - resilient multi-provider LLM dispatch
//!
//! Routes a "generate text" request to one of several configured providers,
//! retrying the chosen provider with backoff and failing over to the others in
//! priority order. Buffered and streamed responses are both supported; every
//! attempt is recorded in an append-only outcome log.
#![deny(unsafe_code)]

//! ## Features
//!
//! - **Routing**: explicit provider, then task route, then the default or
//!   lowest-priority provider.
//! - **One adapter per wire format**: chat-completions vendors (OpenAI,
//!   DeepSeek, Groq, Together, OpenRouter, Ollama, Azure and any compatible
//!   endpoint) share one implementation; Anthropic has its own.
//! - **Retry and failover**: an explicit state machine with bounded attempts.
//! - **Streaming**: a `futures::Stream` of text deltas ending in one completion
//!   event. Nothing is retried once output has been delivered.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use llm_relay::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryConfigStore::from_json(r#"{
//!         "providers": [
//!             {"id": "primary", "kind": "openai", "credential": "sk-...", "models": ["gpt-4o-mini"]},
//!             {"id": "backup", "kind": "anthropic", "credential": "sk-ant-...",
//!              "models": ["claude-3-5-haiku-latest"], "priority": 1}
//!         ]
//!     }"#)?);
//!
//!     let dispatcher = Dispatcher::builder().store(store).build()?;
//!     let result = dispatcher
//!         .call(CallRequest::new(vec![ChatMessage::user("Hello!")]))
//!         .await?;
//!     println!("{}: {}", result.provider_id, result.content);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod settings;
pub mod store;
pub mod streaming;
pub mod telemetry;
pub mod types;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use error::{ErrorKind, LlmError};

/// Commonly used items
pub mod prelude {
    pub use crate::adapters::{AdapterKind, ProviderAdapter};
    pub use crate::credentials::{Base64Cipher, CredentialCipher, PlaintextCipher, mask_secret};
    pub use crate::dispatcher::{DispatchState, Dispatcher, DispatcherBuilder};
    pub use crate::error::{ErrorKind, LlmError};
    pub use crate::retry::{Backoff, RetryPolicy};
    pub use crate::settings::DispatchSettings;
    pub use crate::store::{
        ConfigStore, InMemoryConfigStore, InMemoryOutcomeLog, OutcomeLog, TracingOutcomeLog,
    };
    pub use crate::streaming::{DispatchStream, StreamEvent, collect_stream};
    pub use crate::types::{
        AvailabilityReport, CallOutcome, CallParameters, CallRequest, CallResult, ChatMessage,
        MessageRole, OutcomeStatus, ProviderConfig, ProviderKind, TaskRoute, Usage,
    };
}
