//! Bounded parallel fan-out with all-or-nothing results.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default per-operation timeout (3 minutes).
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Default number of operations running at once.
pub const DEFAULT_PARALLELISM: usize = 8;

/// Why a fan-out was aborted.
#[derive(Debug, Error)]
pub enum FanoutError<E> {
    /// An operation returned an error.
    #[error("operation {index} failed: {source}")]
    Operation {
        index: usize,
        #[source]
        source: E,
    },

    /// No operation completed within the per-operation timeout.
    #[error("no operation completed within {timeout:?} ({pending} of {total} pending)")]
    Timeout {
        timeout: Duration,
        pending: usize,
        total: usize,
    },

    /// An operation panicked.
    #[error("operation panicked: {0}")]
    Panicked(String),
}

/// Runs a batch of operations concurrently on a semaphore-bounded pool.
///
/// Either every operation succeeds and the caller gets one slot per
/// operation, in input order, or the call fails and every operation still
/// running is aborted.
#[derive(Debug, Clone)]
pub struct ParallelFanoutExecutor {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl Default for ParallelFanoutExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLELISM, DEFAULT_OPERATION_TIMEOUT)
    }
}

impl ParallelFanoutExecutor {
    /// Create an executor; `parallelism` is raised to at least 1.
    pub fn new(parallelism: usize, timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(parallelism.max(1))),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run every operation and collect their results.
    ///
    /// Slot `i` holds the result of operation `i`; `Ok(None)` results become
    /// `None` slots. The timeout bounds the wait for each next completion, not
    /// the whole call.
    pub async fn run_all<T, E, F>(&self, operations: Vec<F>) -> Result<Vec<Option<T>>, FanoutError<E>>
    where
        F: Future<Output = Result<Option<T>, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let total = operations.len();
        let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut set = JoinSet::new();

        for (index, operation) in operations.into_iter().enumerate() {
            let permits = Arc::clone(&self.permits);
            set.spawn(async move {
                // The semaphore is never closed, so the permit is always granted.
                let _permit = permits.acquire_owned().await.ok();
                (index, operation.await)
            });
        }

        let mut pending = total;
        while pending > 0 {
            let joined = match tokio::time::timeout(self.timeout, set.join_next()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        timeout = ?self.timeout,
                        pending,
                        total,
                        "Fan-out timed out, aborting remaining operations"
                    );
                    set.abort_all();
                    return Err(FanoutError::Timeout {
                        timeout: self.timeout,
                        pending,
                        total,
                    });
                }
            };
            pending -= 1;

            match joined {
                Ok((index, Ok(value))) => slots[index] = value,
                Ok((index, Err(source))) => {
                    set.abort_all();
                    return Err(FanoutError::Operation { index, source });
                }
                Err(e) => {
                    set.abort_all();
                    return Err(FanoutError::Panicked(e.to_string()));
                }
            }
        }

        Ok(slots)
    }
}
