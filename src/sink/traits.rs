//! Core sink traits.

use super::error::SinkError;
use super::types::{ApiCallLog, RecordBatch};

/// Destination for the records of one collection cycle.
///
/// # Returns
///
/// - `Ok(true)`: The batch is durable
/// - `Ok(false)`: The sink declined the batch
/// - `Err(_)`: The batch could not be written
///
/// Anything other than `Ok(true)` fails the cycle attempt.
#[async_trait::async_trait]
pub trait MetricSink: Send + Sync + 'static {
    async fn save_records(&self, batch: RecordBatch) -> Result<bool, SinkError>;
}

/// Side channel for provider call auditing.
///
/// Best-effort: callers log and continue on error.
pub trait ApiCallAuditLog: Send + Sync + 'static {
    fn log_api_call(&self, call: ApiCallLog) -> Result<(), SinkError>;
}
