//! TCP connect probe provider.
//!
//! Each rendered query is a `host:port` target; the sample reports how long
//! the TCP handshake took.

use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::timeout;

use super::traits::{MetricProvider, MetricSample, ProviderError, ProviderQuery};

/// Default connection timeout (3 seconds).
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Latency value indicating probe failure (connection refused, timeout, etc.).
/// Using -1.0 to distinguish from valid 0ms latency.
pub const FAILURE_LATENCY_MS: f64 = -1.0;

/// Metric name of every sample this provider emits.
pub const TCP_CONNECT_METRIC: &str = "tcp.connect";

/// Why a probe did not connect.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {target} timed out after {timeout:?}")]
    Timeout { target: String, timeout: Duration },
}

/// Open one TCP connection to `target` and return the handshake latency.
pub async fn probe(target: &str, probe_timeout: Duration) -> Result<Duration, ProbeError> {
    let start = Instant::now();
    match timeout(probe_timeout, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => Ok(start.elapsed()),
        Ok(Err(source)) => Err(ProbeError::Connect {
            target: target.to_string(),
            source,
        }),
        Err(_) => Err(ProbeError::Timeout {
            target: target.to_string(),
            timeout: probe_timeout,
        }),
    }
}

/// Provider measuring TCP connect latency.
///
/// An unreachable target is an observation, not a fetch error: it is reported
/// as a sample with `success = 0` and latency [`FAILURE_LATENCY_MS`].
#[derive(Debug, Clone)]
pub struct TcpProbeProvider {
    timeout: Duration,
}

impl Default for TcpProbeProvider {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl TcpProbeProvider {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait::async_trait]
impl MetricProvider for TcpProbeProvider {
    fn name(&self) -> &str {
        "tcp"
    }

    async fn fetch(&self, query: &ProviderQuery) -> Result<Option<Vec<MetricSample>>, ProviderError> {
        let target = query.query.trim();
        if target.is_empty() {
            return Err(ProviderError::Request(format!(
                "empty probe target for host {}",
                query.host
            )));
        }

        let (latency_ms, success) = match probe(target, self.timeout).await {
            Ok(elapsed) => {
                let ms = elapsed.as_secs_f64() * 1000.0;
                tracing::debug!(host = %query.host, target = %target, latency_ms = ms, "TCP probe successful");
                (ms, 1.0)
            }
            Err(e) => {
                tracing::warn!(host = %query.host, error = %e, "TCP probe failed");
                (FAILURE_LATENCY_MS, 0.0)
            }
        };

        let sample = MetricSample::new(TCP_CONNECT_METRIC, query.window_start.timestamp_millis())
            .with_value("latency_ms", latency_ms)
            .with_value("success", success);
        Ok(Some(vec![sample]))
    }
}
