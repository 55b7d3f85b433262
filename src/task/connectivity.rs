//! TCP reachability check.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::dispatcher::TaskHandler;
use super::types::{FailureKind, TaskError, TaskInvocation};
use crate::provider::probe;
use crate::provider::tcp::DEFAULT_PROBE_TIMEOUT;

fn default_timeout() -> Duration {
    DEFAULT_PROBE_TIMEOUT
}

/// Parameters of a connectivity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectivityParams {
    pub host: String,
    pub port: u16,
    /// Probe timeout (default: 3s).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Handler for [`TaskType::ConnectivityCheck`](super::TaskType::ConnectivityCheck).
///
/// Reachable: `Success({reachable, target, latency_ms})`.
/// Unreachable: recoverable failure with kind `Connectivity`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectivityCheckHandler;

impl ConnectivityCheckHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl TaskHandler for ConnectivityCheckHandler {
    async fn handle(&self, invocation: &TaskInvocation) -> Result<Option<Value>, TaskError> {
        let params: ConnectivityParams = serde_json::from_value(invocation.parameters.clone())
            .map_err(|e| {
                TaskError::fatal(
                    format!("invalid connectivity parameters: {e}"),
                    FailureKind::Configuration,
                )
            })?;
        if params.host.trim().is_empty() {
            return Err(TaskError::fatal(
                "connectivity check requires a host",
                FailureKind::Configuration,
            ));
        }

        let target = format!("{}:{}", params.host, params.port);
        match probe(&target, params.timeout).await {
            Ok(elapsed) => Ok(Some(json!({
                "reachable": true,
                "target": target,
                "latency_ms": elapsed.as_secs_f64() * 1000.0,
            }))),
            Err(e) => Err(TaskError::recoverable(
                format!("{target} is unreachable: {e}"),
                FailureKind::Connectivity,
            )),
        }
    }
}
