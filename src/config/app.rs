//! Agent configuration structures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::validation::{ConfigError, expand_env_vars, require_non_zero};
use crate::collection::{
    CollectionSettings, DEFAULT_INITIAL_DELAY, DEFAULT_OPERATION_TIMEOUT, DEFAULT_PARALLELISM,
    DEFAULT_PERIOD, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BACKOFF, DEFAULT_SHUTDOWN_TIMEOUT,
    RetryPolicy,
};
use crate::provider::tcp::DEFAULT_PROBE_TIMEOUT;
use crate::sink::{
    DEFAULT_BATCH_FLUSH_INTERVAL, DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY, SinkBuilder,
};

/// Default sink directory.
pub const DEFAULT_SINK_DIR: &str = "./data";

// =============================================================================
// Collection Configuration
// =============================================================================

/// Defaults applied to every collection job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Cycle period (default: 1m).
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Delay before the first cycle of jobs that are not always-on (default: 2m).
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Attempts per cycle (default: 3).
    pub retry_attempts: u32,

    /// Sleep between attempts (default: 30s).
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,

    /// Per-operation fan-out timeout (default: 3m).
    #[serde(with = "humantime_serde")]
    pub fanout_timeout: Duration,

    /// Provider calls in flight per cycle (default: 8).
    pub fanout_parallelism: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            initial_delay: DEFAULT_INITIAL_DELAY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            fanout_timeout: DEFAULT_OPERATION_TIMEOUT,
            fanout_parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl CollectionConfig {
    /// Settings handed to the collection task handler.
    pub fn settings(&self) -> CollectionSettings {
        CollectionSettings {
            period: self.period,
            initial_delay: self.initial_delay,
            retry: RetryPolicy::new(self.retry_attempts, self.retry_backoff),
            fanout_timeout: self.fanout_timeout,
            fanout_parallelism: self.fanout_parallelism,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_non_zero("collection.period", self.period)?;
        require_non_zero("collection.fanout_timeout", self.fanout_timeout)?;
        if self.retry_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "collection.retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.fanout_parallelism == 0 {
            return Err(ConfigError::ValidationError(
                "collection.fanout_parallelism must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Sink Configuration
// =============================================================================

/// File sink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Directory receiving `metrics.jsonl` and `api_calls.jsonl` (default: ./data).
    pub dir: PathBuf,

    /// Writer command channel capacity (default: 10000).
    pub channel_capacity: usize,

    /// API-call flush threshold (default: 500).
    pub batch_size: usize,

    /// API-call flush interval (default: 1s).
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_SINK_DIR),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_BATCH_FLUSH_INTERVAL,
        }
    }
}

impl SinkConfig {
    /// Builder preconfigured from this section.
    pub fn builder(&self) -> SinkBuilder {
        SinkBuilder::new(&self.dir)
            .channel_capacity(self.channel_capacity)
            .batch_size(self.batch_size)
            .batch_flush_interval(self.flush_interval)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "sink.dir must not be empty".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "sink.channel_capacity must be positive".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "sink.batch_size must be positive".to_string(),
            ));
        }
        require_non_zero("sink.flush_interval", self.flush_interval)
    }
}

// =============================================================================
// Agent Configuration
// =============================================================================

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Grace period for running jobs on shutdown (default: 5s).
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Connect timeout of the `tcp` provider (default: 3s).
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub collection: CollectionConfig,
    pub sink: SinkConfig,
    pub agent: AgentSettings,
}

impl AgentConfig {
    /// Load configuration from a YAML file, expanding environment references first.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(&expand_env_vars(content))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collection.validate()?;
        self.sink.validate()?;
        require_non_zero("agent.probe_timeout", self.agent.probe_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = AgentConfig::from_yaml("{}").unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.collection.period, Duration::from_secs(60));
        assert_eq!(config.collection.initial_delay, Duration::from_secs(120));
        assert_eq!(config.sink.dir, PathBuf::from(DEFAULT_SINK_DIR));
        assert_eq!(config.agent.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
collection:
  period: 30s
  initial_delay: 0s
  retry_attempts: 5
  retry_backoff: 10s
  fanout_timeout: 1m
  fanout_parallelism: 4
sink:
  dir: /var/lib/delegate
  channel_capacity: 100
  batch_size: 50
  flush_interval: 250ms
agent:
  shutdown_timeout: 10s
"#;
        let config = AgentConfig::from_yaml(yaml).unwrap();

        let settings = config.collection.settings();
        assert_eq!(settings.period, Duration::from_secs(30));
        assert_eq!(settings.initial_delay, Duration::ZERO);
        assert_eq!(settings.retry, RetryPolicy::new(5, Duration::from_secs(10)));
        assert_eq!(settings.fanout_timeout, Duration::from_secs(60));
        assert_eq!(settings.fanout_parallelism, 4);

        assert_eq!(config.sink.dir, PathBuf::from("/var/lib/delegate"));
        assert_eq!(config.sink.flush_interval, Duration::from_millis(250));
        assert_eq!(config.agent.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(config.agent.probe_timeout, DEFAULT_PROBE_TIMEOUT);
    }

    #[test]
    fn test_env_expansion_before_parse() {
        let config =
            AgentConfig::from_yaml("sink:\n  dir: ${DELEGATE_TEST_UNSET_DIR:-/tmp/delegate}\n")
                .unwrap();
        assert_eq!(config.sink.dir, PathBuf::from("/tmp/delegate"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = AgentConfig::from_yaml("collection:\n  retry_attempts: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = AgentConfig::from_yaml("sink:\n  batch_size: 0\n").unwrap_err();
        assert!(err.to_string().contains("sink.batch_size"));

        let err = AgentConfig::from_yaml("collection:\n  period: 0s\n").unwrap_err();
        assert!(err.to_string().contains("collection.period"));
    }

    #[test]
    fn test_bad_duration_is_parse_error() {
        let err = AgentConfig::from_yaml("collection:\n  period: soon\n").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.yaml");
        std::fs::write(&path, "collection:\n  period: 15s\n").unwrap();

        let config = AgentConfig::load(&path).unwrap();
        assert_eq!(config.collection.period, Duration::from_secs(15));

        let missing = AgentConfig::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::IoError(_)));
    }
}
