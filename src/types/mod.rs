//! Core data model
//!
//! Provider configuration, task routes, call requests/results and the
//! outcome records appended for every attempt.

mod call;
mod message;
mod params;
mod provider;

pub use call::*;
pub use message::*;
pub use params::*;
pub use provider::*;

/// Serialize a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
