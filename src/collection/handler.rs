//! Task handler that runs a metric collection job to completion.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};

use super::cycle::{CycleIdentity, MetricCollectionCycle};
use super::fanout::{DEFAULT_OPERATION_TIMEOUT, DEFAULT_PARALLELISM, ParallelFanoutExecutor};
use super::job::{JobContext, JobStatus};
use super::params::CollectionParams;
use super::registry::JobRegistry;
use super::retry::{RetryPolicy, RetryingCycleRunner};
use super::scheduler::{
    DEFAULT_INITIAL_DELAY, DEFAULT_PERIOD, PeriodicCollectionScheduler, ScheduleSettings,
};
use crate::metric::{MINUTE_MS, minute_boundary};
use crate::provider::{ProviderRegistry, SecretResolver};
use crate::sink::{ApiCallAuditLog, MetricSink};
use crate::task::{FailureKind, TaskError, TaskHandler, TaskInvocation};

/// Agent-wide knobs shared by every collection job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSettings {
    pub period: Duration,
    /// Used when the job is not always-on and sets no delay of its own.
    pub initial_delay: Duration,
    pub retry: RetryPolicy,
    pub fanout_timeout: Duration,
    pub fanout_parallelism: usize,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            period: DEFAULT_PERIOD,
            initial_delay: DEFAULT_INITIAL_DELAY,
            retry: RetryPolicy::default(),
            fanout_timeout: DEFAULT_OPERATION_TIMEOUT,
            fanout_parallelism: DEFAULT_PARALLELISM,
        }
    }
}

/// Handler for collection task types.
///
/// Each invocation builds one job, registers it, starts its scheduler and
/// resolves with the job's outcome. Results reach the sink cycle by cycle;
/// the task response only carries the summary.
pub struct CollectionTaskHandler {
    providers: ProviderRegistry,
    secrets: Arc<dyn SecretResolver>,
    sink: Arc<dyn MetricSink>,
    audit: Option<Arc<dyn ApiCallAuditLog>>,
    registry: JobRegistry,
    settings: CollectionSettings,
}

impl std::fmt::Debug for CollectionTaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionTaskHandler")
            .field("providers", &self.providers.names())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CollectionTaskHandler {
    pub fn new(
        providers: ProviderRegistry,
        secrets: Arc<dyn SecretResolver>,
        sink: Arc<dyn MetricSink>,
        registry: JobRegistry,
    ) -> Self {
        Self {
            providers,
            secrets,
            sink,
            audit: None,
            registry,
            settings: CollectionSettings::default(),
        }
    }

    pub fn with_audit_log(mut self, audit: Arc<dyn ApiCallAuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_settings(mut self, settings: CollectionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    fn parse(invocation: &TaskInvocation) -> Result<CollectionParams, TaskError> {
        let params: CollectionParams = serde_json::from_value(invocation.parameters.clone())
            .map_err(|e| {
                TaskError::fatal(
                    format!("invalid collection parameters: {e}"),
                    FailureKind::Configuration,
                )
            })?;
        params
            .validate()
            .map_err(|e| TaskError::fatal(e, FailureKind::Configuration))?;
        Ok(params)
    }

    fn schedule_for(&self, params: &CollectionParams) -> ScheduleSettings {
        let initial_delay = if params.always_on {
            Duration::ZERO
        } else {
            params.initial_delay.unwrap_or(self.settings.initial_delay)
        };
        ScheduleSettings::new(initial_delay, self.settings.period)
    }
}

#[async_trait::async_trait]
impl TaskHandler for CollectionTaskHandler {
    async fn handle(&self, invocation: &TaskInvocation) -> Result<Option<Value>, TaskError> {
        let params = Self::parse(invocation)?;

        let provider = self.providers.get(&params.provider).ok_or_else(|| {
            TaskError::fatal(
                format!(
                    "unknown provider '{}' (available: {})",
                    params.provider,
                    self.providers.names().join(", ")
                ),
                FailureKind::Configuration,
            )
        })?;

        let credentials = self
            .secrets
            .decrypt_all(&params.credentials)
            .map_err(|e| TaskError::fatal(e.to_string(), FailureKind::Authentication))?;

        let job_id = params.job_id(&invocation.task_id);
        let window_start = match params.start_time {
            Some(start) => start,
            None => {
                let now = minute_boundary(Utc::now().timestamp_millis());
                chrono::DateTime::from_timestamp_millis(now).unwrap_or_else(Utc::now)
            }
        };
        let ctx = Arc::new(JobContext::new(
            job_id.clone(),
            window_start,
            TimeDelta::milliseconds(MINUTE_MS),
        ));

        let schedule = self.schedule_for(&params);
        let total = params.collection_total_minutes;
        let provider_name = params.provider.clone();

        let identity = CycleIdentity {
            account_id: invocation.account_id.clone(),
            app_id: invocation.app_id.clone(),
            task_id: invocation.task_id.clone(),
            job_id: job_id.clone(),
        };
        let mut cycle = MetricCollectionCycle::new(
            identity,
            params,
            credentials,
            provider,
            Arc::clone(&self.sink),
        )
        .with_fanout(ParallelFanoutExecutor::new(
            self.settings.fanout_parallelism,
            self.settings.fanout_timeout,
        ));
        if let Some(audit) = &self.audit {
            cycle = cycle.with_audit_log(Arc::clone(audit));
        }

        let runner = RetryingCycleRunner::new(Arc::new(cycle), self.settings.retry);
        let scheduler =
            PeriodicCollectionScheduler::new(job_id.clone(), schedule, runner, Arc::clone(&ctx));
        let _registration =
            self.registry
                .register(invocation.task_id.clone(), job_id.clone(), &schedule, Arc::clone(&ctx));

        tracing::info!(
            job_id = %job_id,
            task_id = %invocation.task_id,
            provider = %provider_name,
            total_minutes = total,
            schedule = %schedule,
            window_start = %window_start,
            "Starting collection job"
        );
        scheduler
            .start()
            .map_err(|e| TaskError::fatal(e.to_string(), FailureKind::Unknown))?;

        let outcome = scheduler.await_completion().await;
        tracing::info!(
            job_id = %job_id,
            status = %outcome.status,
            cycles = outcome.cycles,
            "Collection job finished"
        );

        match outcome.status {
            JobStatus::Success => Ok(Some(json!({
                "job_id": job_id,
                "status": outcome.status,
                "cycles": outcome.cycles,
            }))),
            JobStatus::Failure => Err(TaskError::fatal(
                outcome
                    .error
                    .unwrap_or_else(|| "collection job failed".to_string()),
                FailureKind::Application,
            )),
        }
    }
}
