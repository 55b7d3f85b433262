//! Per-job state shared by the scheduler, its timer and its cycles.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Error reported for a job stopped by [`JobContext::shutdown`].
pub const SHUTDOWN_MESSAGE: &str = "collection job was shut down";

/// Lifecycle phase of a collection job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Created,
    Scheduled,
    Running,
    Completed(JobStatus),
}

/// Final status of a collection job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum JobStatus {
    Success,
    Failure,
}

/// What a finished job reports to its waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub status: JobStatus,
    /// Reported error, failures only.
    pub error: Option<String>,
    /// Cycles that completed successfully.
    pub cycles: u64,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

/// Mutable state of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionJobState {
    pub phase: JobPhase,
    /// Elapsed collection minutes; only grows.
    pub cycle_index: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub pending_cycle_queued: bool,
    /// Error of the first failed attempt of the latest failing cycle.
    pub last_error_message: Option<String>,
    /// Number of times the job moved to `Completed`; never above 1.
    pub completion_transitions: u32,
}

impl CollectionJobState {
    pub fn is_completed(&self) -> bool {
        matches!(self.phase, JobPhase::Completed(_))
    }
}

/// Decision taken for one timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickAction {
    /// No cycle running: start one.
    Start,
    /// A cycle is running: queue one follow-up.
    Queue,
    /// A follow-up is already queued: drop the tick.
    Drop,
    /// Job is completed: ignore.
    Ignore,
}

/// Shared handle to one job's state and completion signal.
#[derive(Debug)]
pub struct JobContext {
    job_id: String,
    window_width: TimeDelta,
    state: Mutex<CollectionJobState>,
    completion: watch::Sender<Option<JobOutcome>>,
    cancel: CancellationToken,
}

impl JobContext {
    /// Create a job whose first window starts at `window_start`.
    pub fn new(job_id: impl Into<String>, window_start: DateTime<Utc>, window_width: TimeDelta) -> Self {
        let (completion, _) = watch::channel(None);
        Self {
            job_id: job_id.into(),
            window_width,
            state: Mutex::new(CollectionJobState {
                phase: JobPhase::Created,
                cycle_index: 0,
                window_start,
                window_end: window_start + window_width,
                pending_cycle_queued: false,
                last_error_message: None,
                completion_transitions: 0,
            }),
            completion,
            cancel: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CollectionJobState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> CollectionJobState {
        self.lock().clone()
    }

    pub fn cycle_index(&self) -> u64 {
        self.lock().cycle_index
    }

    /// Current `[start, end)` window.
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let state = self.lock();
        (state.window_start, state.window_end)
    }

    pub fn is_completed(&self) -> bool {
        self.lock().is_completed()
    }

    /// Final outcome, once completed.
    pub fn outcome(&self) -> Option<JobOutcome> {
        self.completion.borrow().clone()
    }

    /// Resolves when the job completes.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Complete the job. Only the first call has any effect.
    ///
    /// Returns `true` if this call completed the job.
    pub fn complete(&self, status: JobStatus, error: Option<String>) -> bool {
        let outcome = {
            let mut state = self.lock();
            if state.is_completed() {
                return false;
            }
            state.phase = JobPhase::Completed(status);
            state.pending_cycle_queued = false;
            state.completion_transitions += 1;
            JobOutcome {
                status,
                error,
                cycles: state.cycle_index,
            }
        };

        tracing::info!(
            job_id = %self.job_id,
            status = %outcome.status,
            cycles = outcome.cycles,
            error = outcome.error.as_deref().unwrap_or(""),
            "Collection job completed"
        );
        self.completion.send_replace(Some(outcome));
        self.cancel.cancel();
        true
    }

    /// Stop the job from outside. Idempotent.
    pub fn shutdown(&self) -> bool {
        self.complete(JobStatus::Failure, Some(SHUTDOWN_MESSAGE.to_string()))
    }

    /// Wait until the job completes.
    pub async fn wait(&self) -> JobOutcome {
        let mut rx = self.completion.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        match outcome {
            Some(outcome) => outcome,
            None => {
                // Signal source is gone; treat as terminal.
                self.complete(
                    JobStatus::Failure,
                    Some("completion signal lost".to_string()),
                );
                self.outcome().unwrap_or(JobOutcome {
                    status: JobStatus::Failure,
                    error: Some("completion signal lost".to_string()),
                    cycles: self.cycle_index(),
                })
            }
        }
    }

    // =========================================================================
    // Scheduler transitions
    // =========================================================================

    /// `Created -> Scheduled`; `false` if the job was already started or completed.
    pub(crate) fn mark_scheduled(&self) -> bool {
        let mut state = self.lock();
        if state.phase != JobPhase::Created {
            return false;
        }
        state.phase = JobPhase::Scheduled;
        true
    }

    pub(crate) fn on_tick(&self) -> TickAction {
        let mut state = self.lock();
        match state.phase {
            JobPhase::Completed(_) | JobPhase::Created => TickAction::Ignore,
            JobPhase::Scheduled => {
                state.phase = JobPhase::Running;
                TickAction::Start
            }
            JobPhase::Running if state.pending_cycle_queued => TickAction::Drop,
            JobPhase::Running => {
                state.pending_cycle_queued = true;
                TickAction::Queue
            }
        }
    }

    /// Called when a cycle finishes.
    ///
    /// Returns `true` if a queued cycle should start right away; the flag is
    /// cleared as it starts. Otherwise the job goes back to `Scheduled`.
    pub(crate) fn finish_cycle(&self) -> bool {
        let mut state = self.lock();
        match state.phase {
            JobPhase::Completed(_) => false,
            _ if state.pending_cycle_queued => {
                state.pending_cycle_queued = false;
                true
            }
            _ => {
                state.phase = JobPhase::Scheduled;
                false
            }
        }
    }

    /// Move to the next window after a successful cycle. Returns the new index.
    pub(crate) fn advance(&self) -> u64 {
        let mut state = self.lock();
        state.cycle_index += 1;
        state.window_start = state.window_end;
        state.window_end = state.window_start + self.window_width;
        state.cycle_index
    }

    pub(crate) fn record_error(&self, message: &str) {
        self.lock().last_error_message = Some(message.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn context() -> JobContext {
        let start = Utc.timestamp_millis_opt(0).unwrap();
        JobContext::new("job-1", start, TimeDelta::minutes(1))
    }

    #[test]
    fn test_tick_decisions() {
        let ctx = context();
        assert_eq!(ctx.on_tick(), TickAction::Ignore);

        assert!(ctx.mark_scheduled());
        assert!(!ctx.mark_scheduled());

        assert_eq!(ctx.on_tick(), TickAction::Start);
        assert_eq!(ctx.snapshot().phase, JobPhase::Running);
        assert_eq!(ctx.on_tick(), TickAction::Queue);
        assert!(ctx.snapshot().pending_cycle_queued);
        assert_eq!(ctx.on_tick(), TickAction::Drop);

        assert!(ctx.finish_cycle());
        assert!(!ctx.snapshot().pending_cycle_queued);
        assert_eq!(ctx.snapshot().phase, JobPhase::Running);

        assert!(!ctx.finish_cycle());
        assert_eq!(ctx.snapshot().phase, JobPhase::Scheduled);
    }

    #[test]
    fn test_advance_moves_window() {
        let ctx = context();
        assert_eq!(ctx.advance(), 1);
        assert_eq!(ctx.advance(), 2);

        let (start, end) = ctx.window();
        assert_eq!(start.timestamp_millis(), 120_000);
        assert_eq!(end.timestamp_millis(), 180_000);
    }

    #[test]
    fn test_complete_exactly_once() {
        let ctx = context();
        assert!(ctx.complete(JobStatus::Success, None));
        assert!(!ctx.complete(JobStatus::Failure, Some("late".to_string())));
        assert!(!ctx.shutdown());

        let state = ctx.snapshot();
        assert_eq!(state.phase, JobPhase::Completed(JobStatus::Success));
        assert_eq!(state.completion_transitions, 1);
        assert_eq!(ctx.outcome().unwrap().status, JobStatus::Success);
        assert_eq!(ctx.on_tick(), TickAction::Ignore);
    }

    #[test]
    fn test_concurrent_completion_single_transition() {
        let ctx = Arc::new(context());
        let winners: usize = (0..8)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || {
                    let status = if i % 2 == 0 {
                        JobStatus::Success
                    } else {
                        JobStatus::Failure
                    };
                    ctx.complete(status, None)
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();

        assert_eq!(winners, 1);
        assert_eq!(ctx.snapshot().completion_transitions, 1);
    }

    #[tokio::test]
    async fn test_wait_wakes_on_completion() {
        let ctx = Arc::new(context());
        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.wait().await })
        };

        tokio::task::yield_now().await;
        ctx.shutdown();

        let outcome = waiter.await.unwrap();
        assert_eq!(outcome.status, JobStatus::Failure);
        assert_eq!(outcome.error.as_deref(), Some(SHUTDOWN_MESSAGE));
    }
}
