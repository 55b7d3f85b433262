//! Per-cycle retry with cancellable backoff.

use std::sync::Arc;
use std::time::Duration;

use super::job::{JobContext, JobStatus};
use super::traits::{CycleBody, CycleOutcome};

/// Default attempts per cycle.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default sleep between attempts (30 seconds).
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Attempt ceiling and backoff for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` is raised to at least 1.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// How one cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleVerdict {
    /// The cycle succeeded; the job moved to the next window.
    Advanced { cycle: u64, outcome: CycleOutcome },
    /// The cycle failed for good and the job was completed with FAILURE.
    Failed { message: String, attempts: u32 },
    /// The job completed while the cycle was waiting to retry or start.
    Cancelled,
}

/// Runs a [`CycleBody`] with retries and completes the job when it is done.
#[derive(Clone)]
pub struct RetryingCycleRunner {
    body: Arc<dyn CycleBody>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for RetryingCycleRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingCycleRunner")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingCycleRunner {
    pub fn new(body: Arc<dyn CycleBody>, policy: RetryPolicy) -> Self {
        Self { body, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run the job's current cycle until it succeeds, fails for good or the job completes.
    ///
    /// The reported error is the first attempt's message, unless the attempt
    /// that exhausted the ceiling failed to persist results.
    pub async fn run(&self, ctx: &JobContext) -> CycleVerdict {
        let cycle = ctx.cycle_index();
        let mut attempts = 0u32;
        let mut first_error: Option<String> = None;

        loop {
            if ctx.is_completed() {
                return CycleVerdict::Cancelled;
            }

            let err = match self.body.run_cycle(ctx).await {
                Ok(outcome) => {
                    ctx.advance();
                    if outcome == CycleOutcome::Completed {
                        ctx.complete(JobStatus::Success, None);
                    }
                    return CycleVerdict::Advanced { cycle, outcome };
                }
                Err(err) => err,
            };

            attempts += 1;
            let message = err.to_string();
            let reported = first_error.get_or_insert_with(|| {
                ctx.record_error(&message);
                message.clone()
            });

            if !err.is_retryable() || attempts >= self.policy.max_attempts {
                let message = if err.is_persist() {
                    message
                } else {
                    reported.clone()
                };
                tracing::error!(
                    job_id = %ctx.job_id(),
                    cycle,
                    attempts,
                    retryable = err.is_retryable(),
                    error = %err,
                    "Collection cycle failed, giving up"
                );
                ctx.complete(JobStatus::Failure, Some(message.clone()));
                return CycleVerdict::Failed { message, attempts };
            }

            tracing::warn!(
                job_id = %ctx.job_id(),
                cycle,
                attempt = attempts,
                max_attempts = self.policy.max_attempts,
                backoff = ?self.policy.backoff,
                error = %err,
                "Collection cycle failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.policy.backoff) => {}
                _ = ctx.cancelled() => return CycleVerdict::Cancelled,
            }
        }
    }
}
