//! Channel-backed sink facade.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;

use tokio::sync::oneshot;

use crate::sink::SinkError;
use crate::sink::actor::Command;
use crate::sink::traits::{ApiCallAuditLog, MetricSink};
use crate::sink::types::{ApiCallLog, RecordBatch};

/// Non-blocking sink writer.
///
/// Uses `try_send` throughout: a full channel fails the call instead of
/// blocking the async runtime. A failed record save is retried by the cycle
/// runner; a dropped API-call entry is only counted.
#[derive(Clone)]
pub struct SinkWriter {
    tx: SyncSender<Command>,
    dropped_api_calls: Arc<AtomicU64>,
}

impl std::fmt::Debug for SinkWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkWriter").finish_non_exhaustive()
    }
}

impl SinkWriter {
    pub(crate) fn new(tx: SyncSender<Command>) -> Self {
        Self {
            tx,
            dropped_api_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get total count of API-call entries dropped due to channel capacity.
    pub fn dropped_api_calls(&self) -> u64 {
        self.dropped_api_calls.load(Ordering::Relaxed)
    }

    /// Write a record batch and wait for the actor to acknowledge it.
    ///
    /// Returns the number of records written.
    pub async fn save(&self, batch: RecordBatch) -> Result<usize, SinkError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(Command::SaveRecords { batch, reply })
            .map_err(|_| {
                tracing::warn!("Channel full or closed, record batch not queued");
                SinkError::ChannelSend
            })?;

        rx.await
            .map_err(|_| SinkError::Internal("writer actor dropped the reply".to_string()))?
    }

    /// Queue an API-call entry. Buffered until flush threshold.
    pub fn log_call(&self, call: ApiCallLog) -> Result<(), SinkError> {
        if self.tx.try_send(Command::LogApiCall(call)).is_err() {
            tracing::warn!("Channel full, dropping API call entry");
            self.dropped_api_calls.fetch_add(1, Ordering::Relaxed);
            return Err(SinkError::ChannelSend);
        }
        Ok(())
    }

    /// Force flush all buffered data immediately.
    pub fn flush(&self) -> Result<(), SinkError> {
        self.tx
            .try_send(Command::Flush)
            .map_err(|_| SinkError::ChannelSend)
    }

    /// Ask the actor to flush and stop.
    pub(crate) fn shutdown(&self) -> Result<(), SinkError> {
        self.tx
            .send(Command::Shutdown)
            .map_err(|_| SinkError::ChannelSend)
    }
}

#[async_trait::async_trait]
impl MetricSink for SinkWriter {
    async fn save_records(&self, batch: RecordBatch) -> Result<bool, SinkError> {
        self.save(batch).await.map(|_| true)
    }
}

impl ApiCallAuditLog for SinkWriter {
    fn log_api_call(&self, call: ApiCallLog) -> Result<(), SinkError> {
        self.log_call(call)
    }
}
