//! Core collection traits and types.

use super::error::CollectionError;
use super::job::JobContext;

/// What a successful cycle tells the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Keep the job scheduled.
    Continue,
    /// The total collection duration is reached.
    Completed,
}

/// Work performed once per collection cycle.
///
/// # Error Handling
///
/// Returning an error fails the current attempt. Retryable errors
/// (see [`CollectionError::is_retryable`]) rerun the same cycle after the
/// backoff; anything else fails the job at once.
///
/// Implementations read the cycle index and window from `ctx`; the runner
/// advances them only after a successful attempt.
#[async_trait::async_trait]
pub trait CycleBody: Send + Sync + 'static {
    async fn run_cycle(&self, ctx: &JobContext) -> Result<CycleOutcome, CollectionError>;
}
