//! Job registry for tracking live collection jobs.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::job::JobContext;
use super::scheduler::ScheduleSettings;

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Metadata about a registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    /// Registry id.
    pub id: uuid::Uuid,
    /// Task the job belongs to.
    pub task_id: String,
    /// Job name.
    pub name: String,
    /// Schedule description.
    pub schedule: String,
    pub registered_at: DateTime<Utc>,
}

struct Entry {
    info: JobInfo,
    ctx: Arc<JobContext>,
}

#[derive(Default)]
struct Inner {
    jobs: RwLock<HashMap<uuid::Uuid, Entry>>,
    changed: Notify,
}

/// Registry of live collection jobs.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_count", &self.job_count())
            .finish_non_exhaustive()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job; it stays listed until the returned guard is dropped.
    pub fn register(
        &self,
        task_id: impl Into<String>,
        name: impl Into<String>,
        schedule: &ScheduleSettings,
        ctx: Arc<JobContext>,
    ) -> JobRegistration {
        let id = uuid::Uuid::new_v4();
        let info = JobInfo {
            id,
            task_id: task_id.into(),
            name: name.into(),
            schedule: schedule.to_string(),
            registered_at: Utc::now(),
        };
        tracing::info!(job = %info.name, task_id = %info.task_id, registry_id = %id, "Job registered");

        self.inner
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Entry { info, ctx });
        self.inner.changed.notify_waiters();

        JobRegistration {
            registry: self.clone(),
            id,
        }
    }

    /// List all registered jobs.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self
            .inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| e.info.clone())
            .collect();
        jobs.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        jobs
    }

    /// Get the number of registered jobs.
    pub fn job_count(&self) -> usize {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Remove a job by id; `false` if it was not registered.
    pub fn remove(&self, id: &uuid::Uuid) -> bool {
        let removed = self
            .inner
            .jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        let Some(entry) = removed else {
            return false;
        };
        tracing::info!(job = %entry.info.name, registry_id = %id, "Job removed");
        self.inner.changed.notify_waiters();
        true
    }

    /// Shut down every job with the default timeout.
    pub async fn shutdown(&self) -> bool {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shut down every job and wait for their handlers to unregister them.
    ///
    /// Returns `false` if jobs were still registered when the timeout elapsed.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> bool {
        let contexts: Vec<Arc<JobContext>> = self
            .inner
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| Arc::clone(&e.ctx))
            .collect();
        let job_count = contexts.len();
        for ctx in &contexts {
            ctx.shutdown();
        }

        let drained = tokio::time::timeout(timeout, async {
            loop {
                let changed = self.inner.changed.notified();
                if self.job_count() == 0 {
                    break;
                }
                changed.await;
            }
        })
        .await
        .is_ok();

        if drained {
            tracing::info!(job_count, "Job registry shutdown complete");
        } else {
            tracing::warn!(
                job_count,
                remaining = self.job_count(),
                "Job registry shutdown timed out"
            );
        }
        drained
    }
}

/// Keeps a job listed in its registry; dropping it unregisters the job.
#[derive(Debug)]
pub struct JobRegistration {
    registry: JobRegistry,
    id: uuid::Uuid,
}

impl JobRegistration {
    pub fn id(&self) -> uuid::Uuid {
        self.id
    }
}

impl Drop for JobRegistration {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}
