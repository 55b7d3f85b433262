//! Sink builder and handles.
//!
//! Provides a builder pattern for constructing the file sink
//! and a handles struct owning the writer actor.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::sink::SinkError;
use crate::sink::SinkWriter;
use crate::sink::actor::{DEFAULT_BATCH_FLUSH_INTERVAL, DEFAULT_BATCH_SIZE, SinkActor};

/// Default channel capacity for writer commands.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Builder for constructing the file sink.
#[derive(Debug, Clone)]
pub struct SinkBuilder {
    dir: PathBuf,
    channel_capacity: usize,
    batch_size: usize,
    batch_flush_interval: Duration,
}

impl SinkBuilder {
    /// Create a new sink builder writing into `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_flush_interval: DEFAULT_BATCH_FLUSH_INTERVAL,
        }
    }

    /// Set the channel capacity for writer commands.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the API-call batch size.
    ///
    /// Default: 500 entries.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the API-call batch flush interval.
    ///
    /// Default: 1 second.
    pub fn batch_flush_interval(mut self, interval: Duration) -> Self {
        self.batch_flush_interval = interval;
        self
    }

    /// Create the directory if needed, spawn the writer actor and return handles.
    pub fn build(self) -> Result<SinkHandles, SinkError> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir).map_err(|e| {
                SinkError::Internal(format!(
                    "Failed to create sink directory '{}': {}",
                    self.dir.display(),
                    e
                ))
            })?;
        }

        let (actor_handle, tx) = SinkActor::spawn(
            &self.dir,
            self.channel_capacity,
            self.batch_size,
            self.batch_flush_interval,
        )?;

        tracing::info!(dir = %self.dir.display(), "File sink ready");

        Ok(SinkHandles {
            writer: SinkWriter::new(tx),
            dir: self.dir,
            actor_handle: Some(actor_handle),
        })
    }
}

/// Handles to the running file sink.
pub struct SinkHandles {
    /// Writer facade; clone freely.
    pub writer: SinkWriter,
    dir: PathBuf,
    /// Internal actor handle for graceful shutdown.
    actor_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SinkHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandles")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl SinkHandles {
    /// Directory the sink writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Gracefully shutdown the sink.
    ///
    /// Sends shutdown command to the writer actor and waits for it to flush and exit.
    pub fn shutdown(mut self) -> Result<(), SinkError> {
        self.writer.shutdown()?;

        if let Some(handle) = self.actor_handle.take() {
            handle
                .join()
                .map_err(|_| SinkError::Internal("Failed to join actor thread".to_string()))?;
        }

        Ok(())
    }
}

impl Drop for SinkHandles {
    fn drop(&mut self) {
        // Try graceful shutdown if not already done
        if self.actor_handle.is_some() {
            let _ = self.writer.shutdown();
            if let Some(handle) = self.actor_handle.take() {
                let _ = handle.join();
            }
        }
    }
}
