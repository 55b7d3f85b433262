//! Configuration module for the delegate agent.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Collection defaults (period, initial delay, retry, fan-out)
//! - Sink settings (directory, channel capacity, batching)
//! - Agent settings (shutdown grace period, probe timeout)

mod app;
mod validation;

pub use app::{AgentConfig, AgentSettings, CollectionConfig, DEFAULT_SINK_DIR, SinkConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
