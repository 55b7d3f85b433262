//! Periodic metric collection jobs.
//!
//! A collection job repeatedly queries a [`MetricProvider`](crate::provider::MetricProvider)
//! for a fixed number of one-minute windows, aggregates the samples per series
//! and minute, and hands each cycle's records to a [`MetricSink`](crate::sink::MetricSink).
//!
//! The pieces, bottom-up:
//!
//! - [`ParallelFanoutExecutor`]: bounded parallel execution of one cycle's provider calls
//! - [`MetricCollectionCycle`]: the built-in [`CycleBody`]
//! - [`RetryingCycleRunner`]: per-cycle retry with cancellable backoff
//! - [`PeriodicCollectionScheduler`]: timer with single-slot coalescing of overdue cycles
//! - [`JobRegistry`]: live jobs, used for listing and graceful shutdown
//! - [`CollectionTaskHandler`]: glues all of the above to a task invocation

mod cycle;
mod error;
mod fanout;
mod handler;
mod job;
mod params;
mod registry;
mod retry;
mod scheduler;
mod traits;

pub use cycle::{CycleIdentity, MetricCollectionCycle};
pub use error::{CollectionError, PERSIST_FAILURE_MESSAGE};
pub use fanout::{DEFAULT_OPERATION_TIMEOUT, DEFAULT_PARALLELISM, FanoutError, ParallelFanoutExecutor};
pub use handler::{CollectionSettings, CollectionTaskHandler};
pub use job::{CollectionJobState, JobContext, JobOutcome, JobPhase, JobStatus, SHUTDOWN_MESSAGE};
pub use params::{CollectionParams, DEFAULT_COLLECTION_MINUTES, DEFAULT_GROUP};
pub use registry::{DEFAULT_SHUTDOWN_TIMEOUT, JobInfo, JobRegistration, JobRegistry};
pub use retry::{
    CycleVerdict, DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_BACKOFF, RetryPolicy, RetryingCycleRunner,
};
pub use scheduler::{
    DEFAULT_INITIAL_DELAY, DEFAULT_PERIOD, MIN_PERIOD, PeriodicCollectionScheduler,
    ScheduleSettings,
};
pub use traits::{CycleBody, CycleOutcome};
