//! Collection job parameters.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metric::Correlation;

/// Group assigned to hosts listed without one.
pub const DEFAULT_GROUP: &str = "default";

/// Default total collection length in minutes.
pub const DEFAULT_COLLECTION_MINUTES: u32 = 15;

fn default_collection_minutes() -> u32 {
    DEFAULT_COLLECTION_MINUTES
}

/// Payload of a metric collection invocation.
///
/// # Example
///
/// ```
/// use delegate_agent::collection::CollectionParams;
///
/// let params: CollectionParams = serde_json::from_value(serde_json::json!({
///     "provider": "tcp",
///     "query": "${host}:443",
///     "hosts": {"web-1": "frontend", "web-2": "frontend", "db-1": "backend"},
///     "collection_total_minutes": 10,
///     "state_execution_id": "se-1",
/// })).unwrap();
/// assert_eq!(params.groups().len(), 2);
/// assert!(params.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionParams {
    /// Provider registry name.
    pub provider: String,
    /// Query template containing `${host}`.
    pub query: String,
    /// Host to group.
    #[serde(default)]
    pub hosts: BTreeMap<String, String>,
    /// Number of cycles (minutes) to collect.
    #[serde(default = "default_collection_minutes")]
    pub collection_total_minutes: u32,
    /// Start of the first window; defaults to the current minute.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// 24x7 job: starts collecting immediately.
    #[serde(default)]
    pub always_on: bool,
    /// Overrides the agent's default initial delay.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub initial_delay: Option<Duration>,
    /// Encrypted credential fields.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,
    #[serde(flatten)]
    pub correlation: Correlation,
}

impl CollectionParams {
    /// Check the parameters that can be checked before the job starts.
    ///
    /// The query placeholder is checked per cycle, where a missing one fails
    /// the job without retry.
    pub fn validate(&self) -> Result<(), String> {
        if self.provider.trim().is_empty() {
            return Err("provider must not be empty".to_string());
        }
        if self.collection_total_minutes == 0 {
            return Err("collection_total_minutes must be at least 1".to_string());
        }
        if let Some(host) = self.hosts.keys().find(|h| h.trim().is_empty()) {
            return Err(format!("invalid empty host name '{host}'"));
        }
        Ok(())
    }

    /// Distinct groups of the job's hosts; `default` when there are no hosts.
    pub fn groups(&self) -> BTreeSet<String> {
        if self.hosts.is_empty() {
            return BTreeSet::from([DEFAULT_GROUP.to_string()]);
        }
        self.hosts
            .values()
            .map(|g| {
                if g.trim().is_empty() {
                    DEFAULT_GROUP.to_string()
                } else {
                    g.clone()
                }
            })
            .collect()
    }

    /// Group of one host.
    pub fn group_of(&self, host: &str) -> String {
        match self.hosts.get(host) {
            Some(group) if !group.trim().is_empty() => group.clone(),
            _ => DEFAULT_GROUP.to_string(),
        }
    }

    /// Job id used for records and logs.
    ///
    /// Falls back to the state-execution id, then to `fallback`.
    pub fn job_id(&self, fallback: &str) -> String {
        [
            &self.correlation.job_id,
            &self.correlation.state_execution_id,
        ]
        .into_iter()
        .find(|id| !id.is_empty())
        .cloned()
        .unwrap_or_else(|| fallback.to_string())
    }
}
