//! Metric Layer
//!
//! Normalized metric records produced by collection cycles and the ordered
//! table they are merged into before being handed to a sink.
//!
//! # Components
//!
//! - [`MetricRecord`]: One (series, host, minute) data point with its sub-metric values
//! - [`SeriesKey`] / [`SeriesName`]: Row identity; heartbeats live in their own namespace
//! - [`AggregationTable`]: Per-cycle `(SeriesKey, timestamp)` store with merge-on-collision

mod record;
mod table;

pub use record::{
    Correlation, HEARTBEAT_HOST, HeartbeatLevel, MINUTE_MS, MetricRecord, SeriesKey, SeriesName,
    minute_boundary,
};
pub use table::AggregationTable;
