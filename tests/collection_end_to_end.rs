//! End-to-end tests for collection jobs.
//!
//! Drives invocations through the dispatcher into the collection handler and
//! checks what reaches the sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use delegate_agent::collection::{
    CollectionSettings, CollectionTaskHandler, JobRegistry, RetryPolicy, SHUTDOWN_MESSAGE,
};
use delegate_agent::metric::{HeartbeatLevel, MINUTE_MS, SeriesName};
use delegate_agent::provider::{
    EnvSecretResolver, MetricProvider, MetricSample, ProviderError, ProviderQuery,
    ProviderRegistry,
};
use delegate_agent::sink::{
    API_CALLS_FILE, ApiCallLog, METRICS_FILE, MemorySink, MetricSink, SinkBuilder, StoredRecord,
};
use delegate_agent::task::{
    ExecutingTasks, FailureKind, HandlerRegistry, TaskDispatcher, TaskInvocation, TaskResponse,
    TaskType,
};
use serde_json::{Value, json};

// =============================================================================
// Test Helpers
// =============================================================================

/// Provider returning one `apdex` sample per host at the window start.
struct StubProvider {
    calls: AtomicUsize,
    failing: bool,
}

impl StubProvider {
    fn healthy() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failing: true,
        }
    }
}

#[async_trait::async_trait]
impl MetricProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn fetch(
        &self,
        query: &ProviderQuery,
    ) -> Result<Option<Vec<MetricSample>>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing {
            return Err(ProviderError::Request(format!("upstream down (call {call})")));
        }
        Ok(Some(vec![
            MetricSample::new("apdex", query.window_start.timestamp_millis() + 1_500)
                .with_value("score", 0.9),
        ]))
    }
}

fn dispatcher(
    provider: StubProvider,
    sink: Arc<dyn MetricSink>,
    registry: JobRegistry,
    settings: CollectionSettings,
) -> TaskDispatcher {
    let handler = CollectionTaskHandler::new(
        ProviderRegistry::new().with(provider),
        Arc::new(EnvSecretResolver::new()),
        sink,
        registry,
    )
    .with_settings(settings);
    TaskDispatcher::new(HandlerRegistry::new().with(TaskType::MetricCollection, Arc::new(handler)))
}

fn fast_settings() -> CollectionSettings {
    CollectionSettings {
        period: Duration::from_secs(60),
        retry: RetryPolicy::new(3, Duration::from_secs(30)),
        ..CollectionSettings::default()
    }
}

fn collection_task(task_id: &str, parameters: Value) -> TaskInvocation {
    TaskInvocation::new(task_id, TaskType::MetricCollection)
        .with_account("acc-1", "app-1")
        .with_parameters(parameters)
}

fn two_host_params(total: u32) -> Value {
    json!({
        "provider": "stub",
        "query": "apdex for ${host}",
        "hosts": {"web-1": "frontend", "web-2": "frontend"},
        "collection_total_minutes": total,
        "always_on": true,
        "start_time": "2024-03-01T12:00:00Z",
        "state_execution_id": "se-42",
        "workflow_id": "wf-7",
    })
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_cycle_job_saves_each_minute() {
    let sink = Arc::new(MemorySink::new());
    let dispatcher = dispatcher(
        StubProvider::healthy(),
        sink.clone(),
        JobRegistry::new(),
        fast_settings(),
    );
    let callbacks = Arc::new(AtomicUsize::new(0));

    let response = {
        let callbacks = Arc::clone(&callbacks);
        dispatcher
            .execute(collection_task("task-1", two_host_params(2)), |_| true, move |_, _| {
                callbacks.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap()
    };

    assert!(response.is_success(), "unexpected response: {response:?}");
    assert_eq!(callbacks.load(Ordering::SeqCst), 1);
    let TaskResponse::Success { value } = response else {
        unreachable!()
    };
    assert_eq!(value["status"], "SUCCESS");
    assert_eq!(value["cycles"], 2);
    assert_eq!(value["job_id"], "se-42");

    let batches = sink.batches();
    assert_eq!(batches.len(), 2);
    let mut last_minute = i64::MIN;
    for (cycle, batch) in batches.iter().enumerate() {
        assert_eq!(batch.account_id, "acc-1");
        assert_eq!(batch.task_id, "task-1");

        let (heartbeats, metrics): (Vec<_>, Vec<_>) = batch
            .records
            .iter()
            .partition(|r| r.series == SeriesName::Heartbeat);
        assert_eq!(metrics.len(), 2);
        assert_eq!(heartbeats.len(), 1);
        assert_eq!(heartbeats[0].group, "frontend");

        let expected_level = if cycle == 1 {
            HeartbeatLevel::Final
        } else {
            HeartbeatLevel::Cycle
        };
        assert_eq!(heartbeats[0].level, Some(expected_level));

        for record in &batch.records {
            assert_eq!(record.data_collection_minute, cycle as u64);
            assert_eq!(record.correlation.workflow_id, "wf-7");
            assert_eq!(record.correlation.job_id, "se-42");
        }

        let minute = metrics[0].timestamp;
        assert_eq!(minute % MINUTE_MS, 0);
        assert!(minute > last_minute);
        last_minute = minute;
    }
}

#[tokio::test(start_paused = true)]
async fn test_failing_provider_fails_after_retries() {
    let sink = Arc::new(MemorySink::new());
    let dispatcher = dispatcher(
        StubProvider::failing(),
        sink.clone(),
        JobRegistry::new(),
        fast_settings(),
    );
    let started = tokio::time::Instant::now();

    let response = dispatcher
        .execute(collection_task("task-2", two_host_params(5)), |_| true, |_, _| {})
        .await
        .unwrap();

    assert!(matches!(response, TaskResponse::FatalFailure { .. }));
    assert!(response.failure_kinds().contains(&FailureKind::Application));
    assert!(response.reason().unwrap().contains("upstream down"));
    assert!(sink.batches().is_empty());
    assert_eq!(started.elapsed(), Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_task_is_refused_and_shutdown_reported() {
    let sink = Arc::new(MemorySink::new());
    let registry = JobRegistry::new();
    let dispatcher = dispatcher(
        StubProvider::healthy(),
        sink.clone(),
        registry.clone(),
        fast_settings(),
    );
    let executing = ExecutingTasks::new();
    let responses: Arc<Mutex<Vec<TaskResponse>>> = Arc::default();

    let submit = |dispatcher: &TaskDispatcher| {
        let guard = executing.clone();
        let release = executing.clone();
        let responses = Arc::clone(&responses);
        dispatcher.submit(
            collection_task("task-3", two_host_params(60)).with_async(true),
            move |invocation| guard.try_begin(invocation),
            move |invocation, response| {
                release.finish(&invocation.task_id);
                responses.lock().unwrap().push(response.clone());
            },
        )
    };

    let first = submit(&dispatcher);
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert!(executing.contains("task-3"));
    assert_eq!(registry.job_count(), 1);

    let duplicate = submit(&dispatcher);
    assert!(duplicate.await.unwrap().is_none());
    assert!(responses.lock().unwrap().is_empty());

    assert!(registry.shutdown_with_timeout(Duration::from_secs(5)).await);
    let response = first.await.unwrap().unwrap();

    assert_eq!(response.reason(), Some(SHUTDOWN_MESSAGE));
    assert_eq!(responses.lock().unwrap().len(), 1);
    assert!(executing.is_empty());
    // Cycles saved before shutdown are kept.
    assert_eq!(sink.batches().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_task_timeout_shuts_job_down() {
    let sink = Arc::new(MemorySink::new());
    let registry = JobRegistry::new();
    let dispatcher = dispatcher(
        StubProvider::healthy(),
        sink.clone(),
        registry.clone(),
        fast_settings(),
    );

    let response = dispatcher
        .execute(
            collection_task("task-5", two_host_params(60)).with_timeout(Duration::from_secs(150)),
            |_| true,
            |_, _| {},
        )
        .await
        .unwrap();

    assert!(matches!(response, TaskResponse::FatalFailure { .. }));
    assert!(response.failure_kinds().contains(&FailureKind::Timeout));
    // Dropping the handler unregisters its job.
    assert!(registry.shutdown_with_timeout(Duration::from_secs(1)).await);
    let saved = sink.batches().len();
    assert_eq!(saved, 3);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(sink.batches().len(), saved);
}

#[tokio::test]
async fn test_file_sink_receives_records_and_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    let handles = SinkBuilder::new(dir.path())
        .batch_flush_interval(Duration::from_millis(20))
        .build()
        .unwrap();
    let writer = Arc::new(handles.writer.clone());

    let handler = CollectionTaskHandler::new(
        ProviderRegistry::new().with(StubProvider::healthy()),
        Arc::new(EnvSecretResolver::new()),
        writer.clone(),
        JobRegistry::new(),
    )
    .with_audit_log(writer)
    .with_settings(CollectionSettings {
        period: Duration::from_millis(50),
        ..CollectionSettings::default()
    });
    let dispatcher = TaskDispatcher::new(
        HandlerRegistry::new().with(TaskType::MetricCollection, Arc::new(handler)),
    );

    let response = dispatcher
        .execute(collection_task("task-4", two_host_params(2)), |_| true, |_, _| {})
        .await
        .unwrap();
    assert!(response.is_success(), "unexpected response: {response:?}");

    handles.shutdown().unwrap();

    let metrics = std::fs::read_to_string(dir.path().join(METRICS_FILE)).unwrap();
    let stored: Vec<StoredRecord> = metrics
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(stored.len(), 6);
    assert!(stored.iter().all(|r| r.task_id == "task-4" && r.account_id == "acc-1"));
    assert_eq!(
        stored
            .iter()
            .filter(|r| r.record.level == Some(HeartbeatLevel::Final))
            .count(),
        1
    );

    let calls = std::fs::read_to_string(dir.path().join(API_CALLS_FILE)).unwrap();
    let calls: Vec<ApiCallLog> = calls
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|c| c.provider == "stub" && c.job_id == "se-42"));
    assert!(calls.iter().any(|c| c.request == "apdex for web-1"));
}
