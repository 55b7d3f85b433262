//! Sink Layer
//!
//! Durable destination for collection results and the provider API-call
//! audit trail. Writes go through a single-writer actor thread:
//! - **Records**: written and flushed per batch, acknowledged back to the caller
//! - **API calls**: buffered and flushed at 500 entries or every second
//!
//! # Components
//!
//! - [`MetricSink`] / [`ApiCallAuditLog`]: Traits collection cycles write through
//! - [`SinkWriter`]: Channel-backed implementation of both traits
//! - [`SinkBuilder`] / [`SinkHandles`]: Initialization and lifecycle management
//! - [`MemorySink`]: In-process implementation for embedding and tests

mod actor;
mod builder;
mod error;
mod memory;
mod traits;
mod types;
mod writer;

pub use actor::{API_CALLS_FILE, DEFAULT_BATCH_FLUSH_INTERVAL, DEFAULT_BATCH_SIZE, METRICS_FILE};
pub use builder::{DEFAULT_CHANNEL_CAPACITY, SinkBuilder, SinkHandles};
pub use error::SinkError;
pub use memory::MemorySink;
pub use traits::{ApiCallAuditLog, MetricSink};
pub use types::{ApiCallLog, ApiCallStatus, RecordBatch, StoredRecord};
pub use writer::SinkWriter;
