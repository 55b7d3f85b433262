//! Task invocation and response types.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use thiserror::Error;

// =============================================================================
// Task Types
// =============================================================================

/// Closed set of task kinds the agent understands.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum TaskType {
    /// Long-running periodic metric collection job.
    MetricCollection,
    /// Long-running periodic log collection job.
    LogCollection,
    ConnectivityCheck,
    ShellScript,
    GitCommand,
    Terraform,
    Kubernetes,
    Jenkins,
}

impl TaskType {
    /// Whether the task starts a periodic collection job.
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::MetricCollection | Self::LogCollection)
    }
}

// =============================================================================
// Invocation
// =============================================================================

/// One unit of work from the controller.
///
/// # Example
///
/// ```
/// use delegate_agent::task::{TaskInvocation, TaskType};
///
/// let invocation: TaskInvocation = serde_json::from_str(
///     r#"{"task_id":"t1","account_id":"acc","app_id":"app",
///         "task_type":"CONNECTIVITY_CHECK","parameters":{"host":"10.0.0.1","port":22},
///         "timeout":"30s"}"#,
/// ).unwrap();
/// assert_eq!(invocation.task_type, TaskType::ConnectivityCheck);
/// assert_eq!(invocation.timeout.unwrap().as_secs(), 30);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInvocation {
    pub task_id: String,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub app_id: String,
    pub task_type: TaskType,
    /// Opaque handler-specific payload.
    #[serde(default)]
    pub parameters: Value,
    /// Run in the background instead of blocking the caller.
    #[serde(default, rename = "async")]
    pub is_async: bool,
    /// Upper bound on handler run time.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl TaskInvocation {
    pub fn new(task_id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            task_id: task_id.into(),
            account_id: String::new(),
            app_id: String::new(),
            task_type,
            parameters: Value::Null,
            is_async: false,
            timeout: None,
        }
    }

    pub fn with_account(mut self, account_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self.app_id = app_id.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// =============================================================================
// Response
// =============================================================================

/// Coarse failure classification reported with failed responses.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum FailureKind {
    Application,
    Connectivity,
    Authentication,
    Configuration,
    Timeout,
    Unknown,
}

/// Result of one invocation, handed to the completion callback exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResponse {
    Success {
        value: Value,
    },
    RecoverableFailure {
        reason: String,
        failure_kinds: BTreeSet<FailureKind>,
    },
    FatalFailure {
        reason: String,
        failure_kinds: BTreeSet<FailureKind>,
    },
}

impl TaskResponse {
    pub fn success(value: Value) -> Self {
        Self::Success { value }
    }

    pub fn recoverable(reason: impl Into<String>, kind: FailureKind) -> Self {
        Self::RecoverableFailure {
            reason: reason.into(),
            failure_kinds: BTreeSet::from([kind]),
        }
    }

    pub fn fatal(reason: impl Into<String>, kind: FailureKind) -> Self {
        Self::FatalFailure {
            reason: reason.into(),
            failure_kinds: BTreeSet::from([kind]),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Failure reason, `None` on success.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::RecoverableFailure { reason, .. } | Self::FatalFailure { reason, .. } => {
                Some(reason)
            }
        }
    }

    /// Failure kinds, empty on success.
    pub fn failure_kinds(&self) -> BTreeSet<FailureKind> {
        match self {
            Self::Success { .. } => BTreeSet::new(),
            Self::RecoverableFailure { failure_kinds, .. }
            | Self::FatalFailure { failure_kinds, .. } => failure_kinds.clone(),
        }
    }
}

// =============================================================================
// Handler Errors
// =============================================================================

/// Errors a task handler returns.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    /// The controller may retry the task.
    #[error("{reason}")]
    Recoverable {
        reason: String,
        kinds: BTreeSet<FailureKind>,
    },

    /// Retrying will not help.
    #[error("{reason}")]
    Fatal {
        reason: String,
        kinds: BTreeSet<FailureKind>,
    },
}

impl TaskError {
    pub fn recoverable(reason: impl Into<String>, kind: FailureKind) -> Self {
        Self::Recoverable {
            reason: reason.into(),
            kinds: BTreeSet::from([kind]),
        }
    }

    pub fn fatal(reason: impl Into<String>, kind: FailureKind) -> Self {
        Self::Fatal {
            reason: reason.into(),
            kinds: BTreeSet::from([kind]),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable { .. })
    }
}

impl From<TaskError> for TaskResponse {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Recoverable { reason, kinds } => Self::RecoverableFailure {
                reason,
                failure_kinds: kinds,
            },
            TaskError::Fatal { reason, kinds } => Self::FatalFailure {
                reason,
                failure_kinds: kinds,
            },
        }
    }
}
