//! Sink data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::metric::MetricRecord;

// =============================================================================
// Record Batches
// =============================================================================

/// Every record one collection cycle produced, plus the identifiers the
/// records are filed under.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    pub account_id: String,
    pub app_id: String,
    pub job_id: String,
    pub task_id: String,
    /// Records in aggregation table order.
    pub records: Vec<MetricRecord>,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One line of the metrics file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub account_id: String,
    pub app_id: String,
    pub task_id: String,
    #[serde(flatten)]
    pub record: MetricRecord,
}

// =============================================================================
// API Call Audit
// =============================================================================

/// Outcome of one provider call.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ApiCallStatus {
    Success,
    Failed,
}

/// Audit entry for one provider fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallLog {
    pub job_id: String,
    pub provider: String,
    pub host: String,
    /// Rendered query sent to the provider.
    pub request: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: ApiCallStatus,
    /// Short response summary or error text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

impl ApiCallLog {
    /// Start an entry; it is completed by [`succeeded`](Self::succeeded) or [`failed`](Self::failed).
    pub fn new(
        job_id: impl Into<String>,
        provider: impl Into<String>,
        host: impl Into<String>,
        request: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            provider: provider.into(),
            host: host.into(),
            request: request.into(),
            started_at,
            finished_at: started_at,
            status: ApiCallStatus::Success,
            response: None,
        }
    }

    pub fn succeeded(mut self, summary: impl Into<String>) -> Self {
        self.finished_at = Utc::now();
        self.status = ApiCallStatus::Success;
        self.response = Some(summary.into());
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.finished_at = Utc::now();
        self.status = ApiCallStatus::Failed;
        self.response = Some(error.into());
        self
    }

    /// Wall-clock duration of the call in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_call_log_failed() {
        let started = Utc::now();
        let log = ApiCallLog::new("job", "tcp", "h1", "h1:80", started).failed("refused");

        assert_eq!(log.status, ApiCallStatus::Failed);
        assert_eq!(log.response.as_deref(), Some("refused"));
        assert!(log.duration_ms() >= 0);

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["status"], "failed");
    }

    #[test]
    fn test_stored_record_flattens_record() {
        let stored = StoredRecord {
            account_id: "acc".to_string(),
            app_id: "app".to_string(),
            task_id: "t1".to_string(),
            record: MetricRecord::new("login", "h1", "g", 0).with_value("throughput", 1.0),
        };
        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["account_id"], "acc");
        assert_eq!(json["host"], "h1");
        assert_eq!(json["values"]["throughput"], 1.0);

        let back: StoredRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, stored);
    }
}
