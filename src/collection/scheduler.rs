//! Periodic collection scheduler.
//!
//! Drives one job: a timer task ticks at the configured period and each tick
//! either starts a cycle, queues a single follow-up cycle, or is dropped.
//! Cycles of one job never overlap.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::error::CollectionError;
use super::job::{JobContext, JobOutcome, JobStatus, TickAction};
use super::retry::RetryingCycleRunner;

/// Default cycle period (1 minute).
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// Default initial delay for jobs that are not always-on (2 minutes).
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(120);

/// Minimum allowed period (10 milliseconds).
pub const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Timer settings of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub initial_delay: Duration,
    pub period: Duration,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            period: DEFAULT_PERIOD,
        }
    }
}

impl ScheduleSettings {
    /// Create settings; the period is clamped to [`MIN_PERIOD`].
    pub fn new(initial_delay: Duration, period: Duration) -> Self {
        let period = if period < MIN_PERIOD {
            tracing::warn!(min_period = ?MIN_PERIOD,
                "Period is less than minimum allowed. Using minimum period."
            );
            MIN_PERIOD
        } else {
            period
        };
        Self {
            initial_delay,
            period,
        }
    }
}

impl std::fmt::Display for ScheduleSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "every {} after {}",
            humantime::format_duration(self.period),
            humantime::format_duration(self.initial_delay)
        )
    }
}

/// Owns the timer of one collection job.
///
/// Dropping the scheduler shuts the job down.
pub struct PeriodicCollectionScheduler {
    name: String,
    settings: ScheduleSettings,
    runner: Arc<RetryingCycleRunner>,
    ctx: Arc<JobContext>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for PeriodicCollectionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicCollectionScheduler")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("job_id", &self.ctx.job_id())
            .finish_non_exhaustive()
    }
}

impl PeriodicCollectionScheduler {
    pub fn new(
        name: impl Into<String>,
        settings: ScheduleSettings,
        runner: RetryingCycleRunner,
        ctx: Arc<JobContext>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            runner: Arc::new(runner),
            ctx,
            timer: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> ScheduleSettings {
        self.settings
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    /// Arm the timer.
    ///
    /// # Errors
    /// Returns `CollectionError::Scheduler` if the job was already started or completed.
    pub fn start(&self) -> Result<(), CollectionError> {
        if !self.ctx.mark_scheduled() {
            return Err(CollectionError::Scheduler(format!(
                "job {} cannot be started twice",
                self.ctx.job_id()
            )));
        }

        let name = self.name.clone();
        let ctx = Arc::clone(&self.ctx);
        let runner = Arc::clone(&self.runner);
        let start = Instant::now() + self.settings.initial_delay;
        let period = self.settings.period;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = ctx.cancelled() => break,
                    _ = ticker.tick() => on_tick(&name, &ctx, &runner),
                }
            }
            tracing::debug!(name = %name, "Collection timer stopped");
        });
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::info!(
            name = %self.name,
            job_id = %self.ctx.job_id(),
            schedule = %self.settings,
            "Collection job scheduled"
        );
        Ok(())
    }

    /// Wait for the job to complete, then stop the timer.
    pub async fn await_completion(&self) -> JobOutcome {
        let outcome = self.ctx.wait().await;
        self.stop_timer();
        outcome
    }

    /// Complete the job and stop the timer. Idempotent.
    pub fn shutdown(&self) {
        if self.ctx.shutdown() {
            tracing::info!(name = %self.name, "Collection job shut down");
        }
        self.stop_timer();
    }

    fn stop_timer(&self) {
        if let Some(handle) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for PeriodicCollectionScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn on_tick(name: &str, ctx: &Arc<JobContext>, runner: &Arc<RetryingCycleRunner>) {
    match ctx.on_tick() {
        TickAction::Start => {
            tokio::spawn(run_cycles(
                name.to_string(),
                Arc::clone(ctx),
                Arc::clone(runner),
            ));
        }
        TickAction::Queue => {
            tracing::debug!(name = %name, "Cycle still running, queued one more");
        }
        TickAction::Drop => {
            tracing::debug!(name = %name, "Cycle already queued, dropping tick");
        }
        TickAction::Ignore => {}
    }
}

/// Worker: run the current cycle, then any cycle queued meanwhile.
async fn run_cycles(name: String, ctx: Arc<JobContext>, runner: Arc<RetryingCycleRunner>) {
    loop {
        let attempt = {
            let (ctx, runner) = (Arc::clone(&ctx), Arc::clone(&runner));
            tokio::spawn(async move { runner.run(&ctx).await })
        };

        match attempt.await {
            Ok(verdict) => tracing::debug!(name = %name, ?verdict, "Cycle finished"),
            Err(e) => {
                tracing::error!(name = %name, error = %e, "Collection cycle panicked");
                ctx.complete(
                    JobStatus::Failure,
                    Some(format!("collection cycle panicked: {e}")),
                );
            }
        }

        if !ctx.finish_cycle() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::job::JobPhase;
    use crate::collection::retry::RetryPolicy;
    use crate::collection::traits::{CycleBody, CycleOutcome};
    use crate::provider::ProviderError;
    use chrono::{TimeDelta, TimeZone, Utc};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    /// Sleeps per cycle, records execution intervals, completes after `total` cycles.
    struct TimedBody {
        first_cycle: Duration,
        later_cycles: Duration,
        total: u64,
        runs: StdMutex<Vec<(Instant, Instant)>>,
        active: AtomicBool,
        overlapped: AtomicBool,
    }

    impl TimedBody {
        fn new(first_cycle: Duration, later_cycles: Duration, total: u64) -> Arc<Self> {
            Arc::new(Self {
                first_cycle,
                later_cycles,
                total,
                runs: StdMutex::new(Vec::new()),
                active: AtomicBool::new(false),
                overlapped: AtomicBool::new(false),
            })
        }

        fn runs(&self) -> Vec<(Instant, Instant)> {
            self.runs.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CycleBody for TimedBody {
        async fn run_cycle(&self, ctx: &JobContext) -> Result<CycleOutcome, CollectionError> {
            if self.active.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            let cycle = ctx.cycle_index();
            let start = Instant::now();
            let work = if cycle == 0 {
                self.first_cycle
            } else {
                self.later_cycles
            };
            tokio::time::sleep(work).await;
            self.runs.lock().unwrap().push((start, Instant::now()));
            self.active.store(false, Ordering::SeqCst);

            if cycle + 1 >= self.total {
                Ok(CycleOutcome::Completed)
            } else {
                Ok(CycleOutcome::Continue)
            }
        }
    }

    struct FailingBody(AtomicU64);

    #[async_trait::async_trait]
    impl CycleBody for FailingBody {
        async fn run_cycle(&self, _ctx: &JobContext) -> Result<CycleOutcome, CollectionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(CollectionError::Provider(ProviderError::Timeout))
        }
    }

    fn scheduler(body: Arc<dyn CycleBody>, settings: ScheduleSettings) -> PeriodicCollectionScheduler {
        let ctx = Arc::new(JobContext::new(
            "job-1",
            Utc.timestamp_millis_opt(0).unwrap(),
            TimeDelta::minutes(1),
        ));
        let runner = RetryingCycleRunner::new(body, RetryPolicy::default());
        PeriodicCollectionScheduler::new("test-job", settings, runner, ctx)
    }

    #[test]
    fn test_period_clamped() {
        let settings = ScheduleSettings::new(Duration::ZERO, Duration::from_millis(1));
        assert_eq!(settings.period, MIN_PERIOD);
        assert_eq!(
            ScheduleSettings::new(Duration::ZERO, Duration::from_secs(60)).to_string(),
            "every 1m after 0s"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_to_completion() {
        let body = TimedBody::new(Duration::from_millis(5), Duration::from_millis(5), 3);
        let scheduler = scheduler(
            body.clone(),
            ScheduleSettings::new(Duration::ZERO, Duration::from_millis(50)),
        );
        scheduler.start().unwrap();

        let outcome = scheduler.await_completion().await;

        assert!(outcome.is_success());
        assert_eq!(outcome.cycles, 3);
        assert_eq!(body.runs().len(), 3);
        assert_eq!(scheduler.context().snapshot().completion_transitions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_error() {
        let body = TimedBody::new(Duration::ZERO, Duration::ZERO, 100);
        let scheduler = scheduler(body, ScheduleSettings::default());
        scheduler.start().unwrap();
        assert!(matches!(
            scheduler.start(),
            Err(CollectionError::Scheduler(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_cycle_coalesces_ticks() {
        // First cycle spans ~10 ticks; later cycles are instant.
        let body = TimedBody::new(Duration::from_millis(1050), Duration::ZERO, 100);
        let scheduler = scheduler(
            body.clone(),
            ScheduleSettings::new(Duration::ZERO, Duration::from_millis(100)),
        );
        let origin = Instant::now();
        scheduler.start().unwrap();

        tokio::time::sleep_until(origin + Duration::from_millis(150)).await;
        assert!(scheduler.context().snapshot().pending_cycle_queued);
        assert_eq!(body.runs().len(), 0);

        // First cycle ended at 1050ms and the single queued cycle ran right after it.
        tokio::time::sleep_until(origin + Duration::from_millis(1080)).await;
        let runs = body.runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1].0, runs[0].1);
        assert!(!scheduler.context().snapshot().pending_cycle_queued);

        scheduler.shutdown();
        assert!(!body.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_never_overlap() {
        let body = TimedBody::new(Duration::from_millis(70), Duration::from_millis(70), 8);
        let scheduler = scheduler(
            body.clone(),
            ScheduleSettings::new(Duration::ZERO, Duration::from_millis(20)),
        );
        scheduler.start().unwrap();

        let outcome = scheduler.await_completion().await;

        assert!(outcome.is_success());
        assert!(!body.overlapped.load(Ordering::SeqCst));
        let runs = body.runs();
        assert_eq!(runs.len(), 8);
        for pair in runs.windows(2) {
            assert!(pair[1].0 >= pair[0].1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay_respected() {
        let body = TimedBody::new(Duration::ZERO, Duration::ZERO, 1);
        let scheduler = scheduler(
            body.clone(),
            ScheduleSettings::new(Duration::from_secs(120), Duration::from_secs(60)),
        );
        let origin = Instant::now();
        scheduler.start().unwrap();

        scheduler.await_completion().await;
        assert_eq!(body.runs()[0].0 - origin, Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_idempotent() {
        let body = TimedBody::new(Duration::ZERO, Duration::ZERO, 1000);
        let scheduler = scheduler(
            body,
            ScheduleSettings::new(Duration::ZERO, Duration::from_secs(1)),
        );
        scheduler.start().unwrap();

        scheduler.shutdown();
        scheduler.shutdown();

        let outcome = scheduler.await_completion().await;
        assert_eq!(outcome.status, JobStatus::Failure);
        let state = scheduler.context().snapshot();
        assert_eq!(state.phase, JobPhase::Completed(JobStatus::Failure));
        assert_eq!(state.completion_transitions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_after_success_keeps_success() {
        let body = TimedBody::new(Duration::ZERO, Duration::ZERO, 1);
        let scheduler = scheduler(
            body,
            ScheduleSettings::new(Duration::ZERO, Duration::from_secs(1)),
        );
        scheduler.start().unwrap();
        let outcome = scheduler.await_completion().await;

        scheduler.shutdown();

        assert!(outcome.is_success());
        assert_eq!(scheduler.context().outcome(), Some(outcome));
        assert_eq!(scheduler.context().snapshot().completion_transitions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff_is_prompt() {
        let body = Arc::new(FailingBody(AtomicU64::new(0)));
        let scheduler = scheduler(
            body.clone(),
            ScheduleSettings::new(Duration::ZERO, Duration::from_secs(60)),
        );
        let origin = Instant::now();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.shutdown();
        let outcome = scheduler.await_completion().await;

        assert_eq!(outcome.status, JobStatus::Failure);
        assert!(origin.elapsed() < Duration::from_secs(30));

        // No further attempts after shutdown.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(body.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_shuts_down() {
        let body = TimedBody::new(Duration::ZERO, Duration::ZERO, 1000);
        let scheduler = scheduler(
            body,
            ScheduleSettings::new(Duration::ZERO, Duration::from_secs(1)),
        );
        scheduler.start().unwrap();
        let ctx = Arc::clone(scheduler.context());

        drop(scheduler);

        assert!(ctx.is_completed());
        assert_eq!(ctx.wait().await.status, JobStatus::Failure);
    }
}
