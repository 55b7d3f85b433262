//! In-process sink.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::metric::MetricRecord;
use crate::sink::SinkError;
use crate::sink::traits::{ApiCallAuditLog, MetricSink};
use crate::sink::types::{ApiCallLog, RecordBatch};

/// Sink that keeps everything in memory.
///
/// Failures can be injected to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<RecordBatch>>,
    calls: Mutex<Vec<ApiCallLog>>,
    failures: AtomicU32,
    rejecting: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` saves with an I/O error.
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Answer every save with `Ok(false)` while set.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Accepted batches, in save order.
    pub fn batches(&self) -> Vec<RecordBatch> {
        lock(&self.batches).clone()
    }

    /// Records of every accepted batch, flattened.
    pub fn records(&self) -> Vec<MetricRecord> {
        lock(&self.batches)
            .iter()
            .flat_map(|b| b.records.iter().cloned())
            .collect()
    }

    pub fn api_calls(&self) -> Vec<ApiCallLog> {
        lock(&self.calls).clone()
    }
}

#[async_trait::async_trait]
impl MetricSink for MemorySink {
    async fn save_records(&self, batch: RecordBatch) -> Result<bool, SinkError> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SinkError::Io(std::io::Error::other("injected save failure")));
        }
        if self.rejecting.load(Ordering::SeqCst) {
            return Ok(false);
        }

        lock(&self.batches).push(batch);
        Ok(true)
    }
}

impl ApiCallAuditLog for MemorySink {
    fn log_api_call(&self, call: ApiCallLog) -> Result<(), SinkError> {
        lock(&self.calls).push(call);
        Ok(())
    }
}
