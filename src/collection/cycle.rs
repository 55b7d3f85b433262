//! Metric collection cycle body.
//!
//! One cycle: render a query per host, fetch them all through the fan-out
//! executor, normalize samples into records, add one heartbeat per group and
//! save the merged table through the sink.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::error::CollectionError;
use super::fanout::ParallelFanoutExecutor;
use super::job::JobContext;
use super::params::CollectionParams;
use super::traits::{CycleBody, CycleOutcome};
use crate::metric::{AggregationTable, Correlation, HeartbeatLevel, MetricRecord};
use crate::provider::{
    Credentials, MetricProvider, MetricSample, ProviderError, ProviderQuery, render_query,
};
use crate::sink::{ApiCallAuditLog, ApiCallLog, MetricSink, RecordBatch};

/// Identifiers the cycle files its results under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleIdentity {
    pub account_id: String,
    pub app_id: String,
    pub task_id: String,
    pub job_id: String,
}

/// Samples fetched for one host.
#[derive(Debug)]
struct HostSamples {
    host: String,
    group: String,
    samples: Vec<MetricSample>,
}

/// Built-in cycle body for metric collection jobs.
pub struct MetricCollectionCycle {
    identity: CycleIdentity,
    params: Arc<CollectionParams>,
    correlation: Correlation,
    credentials: Arc<Credentials>,
    provider: Arc<dyn MetricProvider>,
    sink: Arc<dyn MetricSink>,
    audit: Option<Arc<dyn ApiCallAuditLog>>,
    fanout: ParallelFanoutExecutor,
}

impl std::fmt::Debug for MetricCollectionCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricCollectionCycle")
            .field("identity", &self.identity)
            .field("provider", &self.provider.name())
            .field("hosts", &self.params.hosts.len())
            .finish_non_exhaustive()
    }
}

impl MetricCollectionCycle {
    pub fn new(
        identity: CycleIdentity,
        params: CollectionParams,
        credentials: Credentials,
        provider: Arc<dyn MetricProvider>,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        let mut correlation = params.correlation.clone();
        correlation.job_id = identity.job_id.clone();
        Self {
            identity,
            params: Arc::new(params),
            correlation,
            credentials: Arc::new(credentials),
            provider,
            sink,
            audit: None,
            fanout: ParallelFanoutExecutor::default(),
        }
    }

    /// Write one audit entry per provider fetch.
    pub fn with_audit_log(mut self, audit: Arc<dyn ApiCallAuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Use a specific fan-out executor (parallelism and per-operation timeout).
    pub fn with_fanout(mut self, fanout: ParallelFanoutExecutor) -> Self {
        self.fanout = fanout;
        self
    }

    /// One query per host, in host order.
    fn build_queries(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<ProviderQuery>, CollectionError> {
        self.params
            .hosts
            .keys()
            .map(|host| {
                let query =
                    render_query(&self.params.query, host).map_err(CollectionError::Config)?;
                Ok(ProviderQuery {
                    host: host.clone(),
                    group: self.params.group_of(host),
                    query,
                    window_start,
                    window_end,
                    credentials: Arc::clone(&self.credentials),
                })
            })
            .collect()
    }

    /// Fetch operation for one query, auditing the call.
    fn fetch(
        &self,
        query: ProviderQuery,
    ) -> impl Future<Output = Result<Option<HostSamples>, ProviderError>> + Send + 'static {
        let provider = Arc::clone(&self.provider);
        let audit = self.audit.clone();
        let job_id = self.identity.job_id.clone();

        async move {
            let started_at = Utc::now();
            let result = provider.fetch(&query).await.and_then(|samples| {
                if let Some(samples) = &samples {
                    samples.iter().try_for_each(MetricSample::validate)?;
                }
                Ok(samples)
            });

            if let Some(audit) = audit {
                let entry = ApiCallLog::new(
                    job_id,
                    provider.name(),
                    &query.host,
                    &query.query,
                    started_at,
                );
                let entry = match &result {
                    Ok(Some(samples)) => entry.succeeded(format!("{} samples", samples.len())),
                    Ok(None) => entry.succeeded("no data"),
                    Err(e) => entry.failed(e.to_string()),
                };
                if let Err(e) = audit.log_api_call(entry) {
                    tracing::warn!(host = %query.host, error = %e, "Failed to record API call");
                }
            }

            result.map(|samples| {
                samples.map(|samples| HostSamples {
                    host: query.host,
                    group: query.group,
                    samples,
                })
            })
        }
    }

    fn normalize(&self, host: &str, group: &str, cycle: u64, sample: MetricSample) -> MetricRecord {
        MetricRecord::new(sample.name, host, group, sample.timestamp_ms)
            .with_values(sample.values)
            .with_provider(self.provider.name())
            .with_collection_minute(cycle)
            .with_correlation(self.correlation.clone())
    }

    fn heartbeat(&self, group: &str, timestamp_ms: i64, cycle: u64, level: HeartbeatLevel) -> MetricRecord {
        MetricRecord::heartbeat(group, timestamp_ms, level)
            .with_provider(self.provider.name())
            .with_collection_minute(cycle)
            .with_correlation(self.correlation.clone())
    }
}

#[async_trait::async_trait]
impl CycleBody for MetricCollectionCycle {
    async fn run_cycle(&self, ctx: &JobContext) -> Result<CycleOutcome, CollectionError> {
        let cycle = ctx.cycle_index();
        let (window_start, window_end) = ctx.window();
        let is_final = cycle + 1 >= u64::from(self.params.collection_total_minutes);

        let queries = self.build_queries(window_start, window_end)?;
        let operations: Vec<_> = queries.into_iter().map(|q| self.fetch(q)).collect();
        let fetched = self.fanout.run_all(operations).await?;

        let mut table = AggregationTable::new();
        for HostSamples {
            host,
            group,
            samples,
        } in fetched.into_iter().flatten()
        {
            for sample in samples {
                table.insert(self.normalize(&host, &group, cycle, sample));
            }
        }

        let level = if is_final {
            HeartbeatLevel::Final
        } else {
            HeartbeatLevel::Cycle
        };
        for group in self.params.groups() {
            table.insert(self.heartbeat(&group, window_start.timestamp_millis(), cycle, level));
        }

        let records = table.into_records();
        let count = records.len();
        let batch = RecordBatch {
            account_id: self.identity.account_id.clone(),
            app_id: self.identity.app_id.clone(),
            job_id: self.identity.job_id.clone(),
            task_id: self.identity.task_id.clone(),
            records,
        };
        match self.sink.save_records(batch).await {
            Ok(true) => {}
            Ok(false) => return Err(CollectionError::Persist("sink rejected batch".to_string())),
            Err(e) => return Err(CollectionError::Persist(e.to_string())),
        }

        tracing::info!(
            job_id = %self.identity.job_id,
            cycle,
            records = count,
            window_start = %window_start,
            final_cycle = is_final,
            "Collection cycle saved"
        );

        Ok(if is_final {
            CycleOutcome::Completed
        } else {
            CycleOutcome::Continue
        })
    }
}
