//! Tracing subscriber setup
//!
//! The library itself only emits `tracing` events. Applications that do not
//! install their own subscriber can use [`init_subscriber`] or
//! [`init_from_env`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use llm_relay::telemetry::{init_subscriber, OutputFormat, SubscriberConfig};
//!
//! let config = SubscriberConfig::builder()
//!     .log_level(tracing::Level::DEBUG)
//!     .output_format(OutputFormat::Json)
//!     .build();
//! let _guard = init_subscriber(config)?;
//! ```

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const ENV_LOG_LEVEL: &str = "LLM_RELAY_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "LLM_RELAY_LOG_FORMAT";
pub const ENV_LOG_FILE: &str = "LLM_RELAY_LOG_FILE";

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Invalid log level: {0}. Valid options: trace, debug, info, warn, error")]
    InvalidLevel(String),
    #[error("Invalid log format: {0}. Valid options: text, json, json-compact")]
    InvalidFormat(String),
    #[error("Invalid log file path: {0}")]
    InvalidPath(PathBuf),
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

/// Output format for tracing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonCompact,
}

impl std::str::FromStr for OutputFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "json-compact" => Ok(Self::JsonCompact),
            _ => Err(TelemetryError::InvalidFormat(s.to_string())),
        }
    }
}

/// Configuration for the tracing subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberConfig {
    pub log_level: tracing::Level,
    pub output_format: OutputFormat,
    /// Write to stderr when no log file is set
    pub enable_console: bool,
    /// Log file path; takes precedence over the console
    pub log_file: Option<PathBuf>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
            enable_console: true,
            log_file: None,
        }
    }
}

impl SubscriberConfig {
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }

    pub fn debug() -> Self {
        Self {
            log_level: tracing::Level::DEBUG,
            ..Self::default()
        }
    }

    /// Read `LLM_RELAY_LOG_*` values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TelemetryError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            builder = builder.log_level_str(&level)?;
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            builder = builder.output_format(format.parse()?);
        }
        if let Some(path) = lookup(ENV_LOG_FILE).filter(|p| !p.trim().is_empty()) {
            builder = builder.log_file(PathBuf::from(path));
        }
        Ok(builder.build())
    }

    fn filter(&self) -> String {
        let level = self.log_level.as_str().to_lowercase();
        format!("llm_relay={level}")
    }
}

/// Builder for [`SubscriberConfig`]
#[derive(Debug, Default)]
pub struct SubscriberConfigBuilder {
    log_level: Option<tracing::Level>,
    output_format: Option<OutputFormat>,
    enable_console: Option<bool>,
    log_file: Option<PathBuf>,
}

impl SubscriberConfigBuilder {
    pub fn log_level(mut self, level: tracing::Level) -> Self {
        self.log_level = Some(level);
        self
    }

    pub fn log_level_str(mut self, level: &str) -> Result<Self, TelemetryError> {
        let parsed = level
            .trim()
            .parse::<tracing::Level>()
            .map_err(|_| TelemetryError::InvalidLevel(level.to_string()))?;
        self.log_level = Some(parsed);
        Ok(self)
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn enable_console(mut self, enable: bool) -> Self {
        self.enable_console = Some(enable);
        self
    }

    pub fn log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    pub fn build(self) -> SubscriberConfig {
        SubscriberConfig {
            log_level: self.log_level.unwrap_or(tracing::Level::INFO),
            output_format: self.output_format.unwrap_or_default(),
            enable_console: self.enable_console.unwrap_or(true),
            log_file: self.log_file,
        }
    }
}

fn file_writer(path: &Path) -> Result<(BoxMakeWriter, WorkerGuard), TelemetryError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| TelemetryError::InvalidPath(path.to_path_buf()))?;
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((BoxMakeWriter::new(writer), guard))
}

/// Install a global subscriber.
///
/// Returns the file writer's guard when logging to a file; keep it alive for
/// the lifetime of the program. An already installed subscriber is not an
/// error.
pub fn init_subscriber(config: SubscriberConfig) -> Result<Option<WorkerGuard>, TelemetryError> {
    let filter = config.filter();
    let (writer, guard, ansi) = match &config.log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            (writer, Some(guard), false)
        }
        None if config.enable_console => (BoxMakeWriter::new(std::io::stderr), None, true),
        None => (BoxMakeWriter::new(std::io::sink), None, false),
    };

    let init_result = match config.output_format {
        OutputFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .try_init(),
        OutputFormat::JsonCompact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .json()
            .flatten_event(true)
            .try_init(),
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .try_init(),
    };

    match init_result {
        Ok(()) => Ok(guard),
        Err(e) => {
            let message = e.to_string();
            if message.contains("global default trace dispatcher has already been set")
                || message.contains("logging system was already initialized")
            {
                Ok(guard)
            } else {
                Err(TelemetryError::Init(message))
            }
        }
    }
}

/// Install a subscriber configured from `LLM_RELAY_LOG_LEVEL`,
/// `LLM_RELAY_LOG_FORMAT` and `LLM_RELAY_LOG_FILE`.
pub fn init_from_env() -> Result<Option<WorkerGuard>, TelemetryError> {
    init_subscriber(SubscriberConfig::from_lookup(|key| std::env::var(key).ok())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn reads_environment_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_LOG_LEVEL, "debug"),
            (ENV_LOG_FORMAT, "json-compact"),
            (ENV_LOG_FILE, "/tmp/relay.log"),
        ]);
        let config = SubscriberConfig::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.log_level, tracing::Level::DEBUG);
        assert_eq!(config.output_format, OutputFormat::JsonCompact);
        assert_eq!(config.log_file, Some(PathBuf::from("/tmp/relay.log")));
        assert_eq!(config.filter(), "llm_relay=debug");
    }

    #[test]
    fn rejects_unknown_values() {
        let bad_level = SubscriberConfig::from_lookup(|k| (k == ENV_LOG_LEVEL).then(|| "loud".into()));
        assert!(matches!(bad_level, Err(TelemetryError::InvalidLevel(_))));
        let bad_format =
            SubscriberConfig::from_lookup(|k| (k == ENV_LOG_FORMAT).then(|| "yaml".into()));
        assert!(matches!(bad_format, Err(TelemetryError::InvalidFormat(_))));
    }

    #[test]
    fn init_tolerates_an_existing_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let config = SubscriberConfig::builder()
            .log_file(dir.path().join("relay.log"))
            .build();
        let first = init_subscriber(config.clone());
        let second = init_subscriber(config);
        assert!(first.is_ok());
        assert!(second.is_ok());
    }
}
