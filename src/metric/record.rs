//! Metric record types.
//!
//! A [`MetricRecord`] is the normalized unit every provider result is turned
//! into. Records are keyed by [`SeriesKey`] and a minute-aligned timestamp;
//! two records sharing both are merge-compatible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Milliseconds in one collection minute.
pub const MINUTE_MS: i64 = 60_000;

/// Host value carried by heartbeat records, which are per group rather than per host.
pub const HEARTBEAT_HOST: &str = "dummy";

/// Floor a millisecond timestamp to the start of its minute.
pub fn minute_boundary(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(MINUTE_MS) * MINUTE_MS
}

// =============================================================================
// Keys
// =============================================================================

/// Name of a series.
///
/// Heartbeats are a separate variant rather than a reserved string, so no
/// provider metric name can ever land in a heartbeat row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesName {
    /// Provider-emitted metric (e.g., "WebTransaction/Servlet/login").
    Metric(String),
    /// Synthetic liveness row emitted once per group per cycle.
    Heartbeat,
}

impl SeriesName {
    /// Create a metric series name.
    pub fn metric(name: impl Into<String>) -> Self {
        Self::Metric(name.into())
    }

    /// Whether this is the heartbeat series.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat)
    }
}

impl std::fmt::Display for SeriesName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metric(name) => f.write_str(name),
            Self::Heartbeat => f.write_str("<heartbeat>"),
        }
    }
}

/// Row key of the aggregation table: series name plus dimension.
///
/// The dimension is the host for metric rows and the group for heartbeat rows.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub series: SeriesName,
    pub dimension: String,
}

impl SeriesKey {
    /// Key for a provider metric on a host.
    pub fn metric(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            series: SeriesName::metric(name),
            dimension: host.into(),
        }
    }

    /// Key for the heartbeat row of a group.
    pub fn heartbeat(group: impl Into<String>) -> Self {
        Self {
            series: SeriesName::Heartbeat,
            dimension: group.into(),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

/// Heartbeat level.
///
/// `H0` marks an ordinary cycle, `HF` the final cycle of a job.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
pub enum HeartbeatLevel {
    #[serde(rename = "H0")]
    #[strum(serialize = "H0")]
    Cycle,
    #[serde(rename = "HF")]
    #[strum(serialize = "HF")]
    Final,
}

/// Job correlation fields copied verbatim from the job parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Correlation {
    pub job_id: String,
    pub state_execution_id: String,
    pub workflow_id: String,
    pub workflow_execution_id: String,
    pub service_id: String,
}

/// A normalized metric data point.
///
/// # Example
///
/// ```
/// use delegate_agent::metric::{MetricRecord, SeriesKey};
///
/// let record = MetricRecord::new("login", "web-1", "default", 1_700_000_012_345)
///     .with_value("throughput", 42.0);
/// assert_eq!(record.timestamp % 60_000, 0);
/// assert_eq!(record.key(), SeriesKey::metric("login", "web-1"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    /// Series the record belongs to.
    pub series: SeriesName,
    /// Host the values were observed on.
    pub host: String,
    /// Logical group (e.g., service tier) of the host.
    pub group: String,
    /// Minute boundary in Unix milliseconds.
    pub timestamp: i64,
    /// Cycle index that produced the record.
    #[serde(default)]
    pub data_collection_minute: u64,
    /// Provider that produced the record.
    #[serde(default)]
    pub provider: String,
    /// Sub-metric name to value.
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
    /// Heartbeat level, heartbeats only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<HeartbeatLevel>,
    #[serde(flatten)]
    pub correlation: Correlation,
}

impl MetricRecord {
    /// Create an empty metric record; the timestamp is floored to its minute.
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        group: impl Into<String>,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            series: SeriesName::metric(name),
            host: host.into(),
            group: group.into(),
            timestamp: minute_boundary(timestamp_ms),
            data_collection_minute: 0,
            provider: String::new(),
            values: BTreeMap::new(),
            level: None,
            correlation: Correlation::default(),
        }
    }

    /// Create a heartbeat record for a group.
    pub fn heartbeat(group: impl Into<String>, timestamp_ms: i64, level: HeartbeatLevel) -> Self {
        Self {
            series: SeriesName::Heartbeat,
            host: HEARTBEAT_HOST.to_string(),
            group: group.into(),
            timestamp: minute_boundary(timestamp_ms),
            data_collection_minute: 0,
            provider: String::new(),
            values: BTreeMap::new(),
            level: Some(level),
            correlation: Correlation::default(),
        }
    }

    /// Set one sub-metric value.
    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Set all sub-metric values.
    pub fn with_values(mut self, values: BTreeMap<String, f64>) -> Self {
        self.values = values;
        self
    }

    /// Set correlation fields.
    pub fn with_correlation(mut self, correlation: Correlation) -> Self {
        self.correlation = correlation;
        self
    }

    /// Set the producing provider.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Set the producing cycle index.
    pub fn with_collection_minute(mut self, minute: u64) -> Self {
        self.data_collection_minute = minute;
        self
    }

    /// Row key of this record.
    pub fn key(&self) -> SeriesKey {
        match &self.series {
            SeriesName::Heartbeat => SeriesKey::heartbeat(self.group.clone()),
            SeriesName::Metric(_) => SeriesKey {
                series: self.series.clone(),
                dimension: self.host.clone(),
            },
        }
    }

    /// Whether this is a heartbeat record.
    pub fn is_heartbeat(&self) -> bool {
        self.series.is_heartbeat()
    }

    /// Merge a more recently produced record into this one.
    ///
    /// Value maps are unioned; on a sub-metric collision `newer` wins.
    pub fn merge(&mut self, newer: MetricRecord) {
        self.values.extend(newer.values);
        self.level = self.level.max(newer.level);
        self.data_collection_minute = self.data_collection_minute.max(newer.data_collection_minute);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_minute_boundary() {
        assert_eq!(minute_boundary(0), 0);
        assert_eq!(minute_boundary(59_999), 0);
        assert_eq!(minute_boundary(60_000), 60_000);
        assert_eq!(minute_boundary(125_000), 120_000);
        assert_eq!(minute_boundary(-1), -60_000);
    }

    #[test]
    fn test_heartbeat_key_never_matches_metric_key() {
        let heartbeat = MetricRecord::heartbeat("default", 0, HeartbeatLevel::Cycle);
        // A provider metric literally named like the heartbeat display form.
        let metric = MetricRecord::new("<heartbeat>", "default", "default", 0);

        assert_ne!(heartbeat.key(), metric.key());
        assert!(heartbeat.is_heartbeat());
        assert!(!metric.is_heartbeat());
    }

    #[test]
    fn test_merge_prefers_newer_value() {
        let mut older = MetricRecord::new("login", "h1", "g", 0)
            .with_value("throughput", 1.0)
            .with_value("error", 0.0);
        let newer = MetricRecord::new("login", "h1", "g", 0)
            .with_value("throughput", 2.0)
            .with_value("apdex", 0.9);

        older.merge(newer);

        assert_eq!(older.values.len(), 3);
        assert_eq!(older.values["throughput"], 2.0);
        assert_eq!(older.values["error"], 0.0);
        assert_eq!(older.values["apdex"], 0.9);
    }

    #[test]
    fn test_merge_keeps_final_heartbeat_level() {
        let mut first = MetricRecord::heartbeat("g", 0, HeartbeatLevel::Final);
        first.merge(MetricRecord::heartbeat("g", 0, HeartbeatLevel::Cycle));
        assert_eq!(first.level, Some(HeartbeatLevel::Final));
    }

    #[test]
    fn test_heartbeat_level_strings() {
        assert_eq!(HeartbeatLevel::Cycle.as_ref(), "H0");
        assert_eq!(HeartbeatLevel::Final.as_ref(), "HF");
        assert_eq!(HeartbeatLevel::from_str("HF").unwrap(), HeartbeatLevel::Final);
    }

    #[test]
    fn test_record_json_shape() {
        let record = MetricRecord::new("login", "h1", "g", 61_000)
            .with_value("throughput", 3.0)
            .with_correlation(Correlation {
                job_id: "job".to_string(),
                service_id: "svc".to_string(),
                ..Default::default()
            });

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["series"]["metric"], "login");
        assert_eq!(json["timestamp"], 60_000);
        assert_eq!(json["job_id"], "job");
        assert_eq!(json["service_id"], "svc");
        assert!(json.get("level").is_none());

        let heartbeat = serde_json::to_value(MetricRecord::heartbeat("g", 0, HeartbeatLevel::Final))
            .unwrap();
        assert_eq!(heartbeat["series"], "heartbeat");
        assert_eq!(heartbeat["level"], "HF");
    }
}
