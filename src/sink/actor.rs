//! Writer actor with dedicated files and MPSC channel.
//!
//! Single-writer pattern: one thread owns both output files, processes commands via MPSC.
//! Record batches are written and flushed immediately, then acknowledged.
//! API-call entries are buffered: flushed when the buffer reaches the batch size or the
//! flush interval elapses.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::sink::SinkError;
use crate::sink::types::{ApiCallLog, RecordBatch, StoredRecord};

// =============================================================================
// Constants
// =============================================================================

/// Default maximum API-call entries in buffer before flush.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default maximum time before API-call buffer flush.
pub const DEFAULT_BATCH_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Metrics file name inside the sink directory.
pub const METRICS_FILE: &str = "metrics.jsonl";

/// API-call audit file name inside the sink directory.
pub const API_CALLS_FILE: &str = "api_calls.jsonl";

// =============================================================================
// Commands
// =============================================================================

/// Commands sent to the writer actor.
#[derive(Debug)]
pub enum Command {
    /// Write a record batch; the reply carries the number of records written.
    SaveRecords {
        batch: RecordBatch,
        reply: oneshot::Sender<Result<usize, SinkError>>,
    },
    /// Append an API-call entry (batch write).
    LogApiCall(ApiCallLog),
    /// Force flush all buffers.
    Flush,
    /// Graceful shutdown.
    Shutdown,
}

// =============================================================================
// Buffers
// =============================================================================

/// Buffer for batch writes with time-based and size-based flushing.
struct BatchBuffer<T> {
    items: Vec<T>,
    last_flush: Instant,
    size_threshold: usize,
    time_threshold: Duration,
}

impl<T> BatchBuffer<T> {
    fn new(size_threshold: usize, time_threshold: Duration) -> Self {
        Self {
            items: Vec::with_capacity(size_threshold),
            last_flush: Instant::now(),
            size_threshold,
            time_threshold,
        }
    }

    fn push(&mut self, item: T) {
        // Reset flush timer on first item to avoid treating long-idle buffers as overdue
        if self.items.is_empty() {
            self.last_flush = Instant::now();
        }
        self.items.push(item);
    }

    fn should_flush(&self) -> bool {
        self.items.len() >= self.size_threshold
            || (!self.items.is_empty() && self.last_flush.elapsed() >= self.time_threshold)
    }

    fn take(&mut self) -> Vec<T> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.items)
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// =============================================================================
// Actor
// =============================================================================

/// File writer actor.
pub struct SinkActor {
    metrics: BufWriter<File>,
    api_calls: BufWriter<File>,
    rx: Receiver<Command>,
    call_buffer: BatchBuffer<ApiCallLog>,
}

fn open_append(path: &Path) -> Result<BufWriter<File>, SinkError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

impl SinkActor {
    /// Spawn the writer actor thread.
    ///
    /// Both files are opened (created if missing, appended otherwise) before
    /// the thread starts, so an unwritable directory fails here.
    pub fn spawn(
        dir: &Path,
        channel_capacity: usize,
        batch_size: usize,
        batch_flush_interval: Duration,
    ) -> Result<(JoinHandle<()>, SyncSender<Command>), SinkError> {
        let (tx, rx) = mpsc::sync_channel(channel_capacity);

        let mut actor = SinkActor {
            metrics: open_append(&dir.join(METRICS_FILE))?,
            api_calls: open_append(&dir.join(API_CALLS_FILE))?,
            rx,
            call_buffer: BatchBuffer::new(batch_size.max(1), batch_flush_interval),
        };
        let handle = thread::Builder::new()
            .name("sink-writer".to_string())
            .spawn(move || actor.run())?;

        Ok((handle, tx))
    }

    fn run(&mut self) {
        tracing::info!("SinkActor started");

        loop {
            let now = Instant::now();
            let deadline = if !self.call_buffer.is_empty() {
                self.call_buffer.last_flush + self.call_buffer.time_threshold
            } else {
                now + Duration::from_secs(60)
            };
            let timeout = deadline.saturating_duration_since(now);

            match self.rx.recv_timeout(timeout) {
                Ok(cmd) => {
                    if self.handle_command(cmd) {
                        break; // Shutdown requested
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Timeout: flush overdue
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("Channel disconnected, shutting down");
                    self.flush_all();
                    break;
                }
            }

            if self.call_buffer.should_flush() {
                self.flush_all();
            }
        }

        tracing::info!("SinkActor stopped");
    }

    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::SaveRecords { batch, reply } => {
                let result = self.write_records(&batch);
                match &result {
                    Ok(count) => {
                        tracing::debug!(job_id = %batch.job_id, count, "Record batch written")
                    }
                    Err(e) => {
                        tracing::error!(job_id = %batch.job_id, error = %e, "Record batch write failed")
                    }
                }
                // Caller may have given up waiting; the write still stands.
                let _ = reply.send(result);
            }
            Command::LogApiCall(call) => {
                self.call_buffer.push(call);
            }
            Command::Flush => {
                self.flush_all();
            }
            Command::Shutdown => {
                tracing::info!("SinkActor shutting down");
                self.flush_all();
                return true;
            }
        }
        false
    }

    fn flush_all(&mut self) {
        if !self.call_buffer.is_empty() {
            let calls = self.call_buffer.take();
            if let Err(e) = self.write_api_calls(&calls) {
                tracing::error!(error = %e, count = calls.len(), "API call batch write failed");
            }
        }
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Write one record batch and flush it to the OS.
    fn write_records(&mut self, batch: &RecordBatch) -> Result<usize, SinkError> {
        for record in &batch.records {
            let line = StoredRecord {
                account_id: batch.account_id.clone(),
                app_id: batch.app_id.clone(),
                task_id: batch.task_id.clone(),
                record: record.clone(),
            };
            serde_json::to_writer(&mut self.metrics, &line)?;
            self.metrics.write_all(b"\n")?;
        }
        self.metrics.flush()?;
        Ok(batch.records.len())
    }

    /// Append buffered API-call entries.
    fn write_api_calls(&mut self, calls: &[ApiCallLog]) -> Result<(), SinkError> {
        for call in calls {
            serde_json::to_writer(&mut self.api_calls, call)?;
            self.api_calls.write_all(b"\n")?;
        }
        self.api_calls.flush()?;

        tracing::debug!(count = calls.len(), "API call batch written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricRecord;
    use chrono::Utc;
    use tempfile::tempdir;

    fn batch(records: Vec<MetricRecord>) -> RecordBatch {
        RecordBatch {
            account_id: "acc".to_string(),
            app_id: "app".to_string(),
            job_id: "job".to_string(),
            task_id: "t1".to_string(),
            records,
        }
    }

    #[test]
    fn test_batch_buffer_size_threshold() {
        let mut buffer = BatchBuffer::new(2, Duration::from_secs(60));
        buffer.push(1);
        assert!(!buffer.should_flush());
        buffer.push(2);
        assert!(buffer.should_flush());
        assert_eq!(buffer.take(), vec![1, 2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_batch_buffer_time_threshold() {
        let mut buffer = BatchBuffer::new(500, Duration::from_millis(10));
        assert!(!buffer.should_flush());
        buffer.push(1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(buffer.should_flush());
    }

    #[test]
    fn test_actor_writes_and_acknowledges_records() {
        let dir = tempdir().unwrap();
        let (handle, tx) =
            SinkActor::spawn(dir.path(), 16, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_FLUSH_INTERVAL)
                .unwrap();

        let (reply, rx) = oneshot::channel();
        tx.send(Command::SaveRecords {
            batch: batch(vec![
                MetricRecord::new("login", "h1", "g", 0).with_value("throughput", 1.0),
                MetricRecord::new("login", "h2", "g", 0).with_value("throughput", 2.0),
            ]),
            reply,
        })
        .unwrap();
        assert_eq!(rx.blocking_recv().unwrap().unwrap(), 2);

        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();

        let content = std::fs::read_to_string(dir.path().join(METRICS_FILE)).unwrap();
        let lines: Vec<StoredRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].record.host, "h1");
        assert_eq!(lines[1].task_id, "t1");
    }

    #[test]
    fn test_actor_flushes_api_calls_on_shutdown() {
        let dir = tempdir().unwrap();
        let (handle, tx) =
            SinkActor::spawn(dir.path(), 16, DEFAULT_BATCH_SIZE, Duration::from_secs(60)).unwrap();

        for host in ["h1", "h2", "h3"] {
            let call = ApiCallLog::new("job", "tcp", host, format!("{host}:80"), Utc::now())
                .succeeded("1 sample");
            tx.send(Command::LogApiCall(call)).unwrap();
        }
        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();

        let content = std::fs::read_to_string(dir.path().join(API_CALLS_FILE)).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_actor_appends_to_existing_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(METRICS_FILE), "{}\n").unwrap();

        let (handle, tx) = SinkActor::spawn(dir.path(), 16, 10, DEFAULT_BATCH_FLUSH_INTERVAL).unwrap();
        let (reply, rx) = oneshot::channel();
        tx.send(Command::SaveRecords {
            batch: batch(vec![MetricRecord::new("login", "h1", "g", 0)]),
            reply,
        })
        .unwrap();
        rx.blocking_recv().unwrap().unwrap();
        drop(tx);
        handle.join().unwrap();

        let content = std::fs::read_to_string(dir.path().join(METRICS_FILE)).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
