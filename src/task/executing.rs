//! Duplicate-execution guard.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::types::TaskInvocation;

/// Task ids currently executing on this agent.
///
/// Used as the dispatch precondition: a task id already present is refused,
/// and the id is released from the completion callback.
#[derive(Debug, Clone, Default)]
pub struct ExecutingTasks {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl ExecutingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the invocation's task id; `false` if it is already executing.
    pub fn try_begin(&self, invocation: &TaskInvocation) -> bool {
        let fresh = self.lock().insert(invocation.task_id.clone());
        if !fresh {
            tracing::warn!(task_id = %invocation.task_id, "Task is already being executed");
        }
        fresh
    }

    /// Release a task id; `false` if it was not held.
    pub fn finish(&self, task_id: &str) -> bool {
        self.lock().remove(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.lock().contains(task_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
