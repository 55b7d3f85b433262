//! Task dispatch with a uniform failure taxonomy.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::task::AbortOnDropHandle;

use super::types::{FailureKind, TaskError, TaskInvocation, TaskResponse, TaskType};

/// Message of the response produced when a handler returns neither value nor error.
pub const NO_RESPONSE_MESSAGE: &str = "no response produced";

/// Handler for one task type.
///
/// # Returns
///
/// - `Ok(Some(value))`: Success response carrying `value`
/// - `Ok(None)`: Treated as a fatal "no response produced"
/// - `Err(TaskError)`: Recoverable or fatal failure response
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, invocation: &TaskInvocation) -> Result<Option<Value>, TaskError>;
}

/// Explicit task type to handler table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.handlers.keys().map(AsRef::as_ref).collect();
        types.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("task_types", &types)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, returning the one it replaced.
    pub fn register(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.insert(task_type, handler)
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(task_type, handler);
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&task_type).cloned()
    }

    pub fn contains(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }
}

/// Routes invocations to handlers and reports exactly one response per
/// dispatched invocation.
#[derive(Debug, Clone)]
pub struct TaskDispatcher {
    handlers: HandlerRegistry,
}

impl TaskDispatcher {
    pub fn new(handlers: HandlerRegistry) -> Self {
        Self { handlers }
    }

    /// Execute an invocation.
    ///
    /// If `precondition` rejects the invocation nothing else happens: no
    /// handler runs, `on_complete` is not called and `None` is returned.
    /// Otherwise `on_complete` is called exactly once with the response,
    /// which is also returned.
    ///
    /// Dropping the returned future aborts the handler, which shuts down any
    /// job it owns; `on_complete` is then never called.
    pub async fn execute<P, C>(
        &self,
        invocation: TaskInvocation,
        precondition: P,
        on_complete: C,
    ) -> Option<TaskResponse>
    where
        P: FnOnce(&TaskInvocation) -> bool,
        C: FnOnce(&TaskInvocation, &TaskResponse),
    {
        if !precondition(&invocation) {
            tracing::debug!(task_id = %invocation.task_id, "Precondition rejected task");
            return None;
        }

        let invocation = Arc::new(invocation);
        tracing::info!(
            task_id = %invocation.task_id,
            task_type = %invocation.task_type,
            "Executing task"
        );

        let response = self.run(&invocation).await;
        match &response {
            TaskResponse::Success { .. } => {
                tracing::info!(task_id = %invocation.task_id, "Task succeeded")
            }
            TaskResponse::RecoverableFailure { reason, .. } => {
                tracing::warn!(task_id = %invocation.task_id, reason = %reason, "Task failed (recoverable)")
            }
            TaskResponse::FatalFailure { reason, .. } => {
                tracing::error!(task_id = %invocation.task_id, reason = %reason, "Task failed")
            }
        }

        on_complete(&invocation, &response);
        Some(response)
    }

    /// Execute an invocation on a background task.
    pub fn submit<P, C>(
        &self,
        invocation: TaskInvocation,
        precondition: P,
        on_complete: C,
    ) -> JoinHandle<Option<TaskResponse>>
    where
        P: FnOnce(&TaskInvocation) -> bool + Send + 'static,
        C: FnOnce(&TaskInvocation, &TaskResponse) + Send + 'static,
    {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher
                .execute(invocation, precondition, on_complete)
                .await
        })
    }

    /// Run the handler on its own task so panics and timeouts stay contained.
    async fn run(&self, invocation: &Arc<TaskInvocation>) -> TaskResponse {
        let Some(handler) = self.handlers.get(invocation.task_type) else {
            return TaskResponse::fatal(
                format!(
                    "no handler registered for task type {}",
                    invocation.task_type
                ),
                FailureKind::Configuration,
            );
        };

        let mut task = {
            let invocation = Arc::clone(invocation);
            AbortOnDropHandle::new(tokio::spawn(
                async move { handler.handle(&invocation).await },
            ))
        };

        let joined = match invocation.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return TaskResponse::fatal(
                        format!(
                            "task timed out after {}",
                            humantime::format_duration(limit)
                        ),
                        FailureKind::Timeout,
                    );
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(Some(value))) => TaskResponse::success(value),
            Ok(Ok(None)) => TaskResponse::fatal(NO_RESPONSE_MESSAGE, FailureKind::Application),
            Ok(Err(err)) => err.into(),
            Err(e) if e.is_panic() => TaskResponse::fatal(
                format!("task panicked: {}", panic_message(e.into_panic())),
                FailureKind::Unknown,
            ),
            Err(_) => TaskResponse::fatal("task was cancelled", FailureKind::Unknown),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
