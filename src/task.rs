//! Task Layer
//!
//! Entry point for every unit of work the agent receives. A [`TaskDispatcher`]
//! routes each [`TaskInvocation`] to the [`TaskHandler`] registered for its
//! [`TaskType`] and turns whatever happens (result, error, panic, timeout)
//! into exactly one [`TaskResponse`].
//!
//! # Components
//!
//! - [`TaskDispatcher`]: Precondition, dispatch, taxonomy, completion callback
//! - [`HandlerRegistry`]: Explicit task type to handler table
//! - [`ExecutingTasks`]: Duplicate-execution guard used as the dispatch precondition
//! - [`ConnectivityCheckHandler`]: Built-in synchronous TCP reachability check

mod connectivity;
mod dispatcher;
mod executing;
mod types;

pub use connectivity::{ConnectivityCheckHandler, ConnectivityParams};
pub use dispatcher::{HandlerRegistry, TaskDispatcher, TaskHandler};
pub use executing::ExecutingTasks;
pub use types::{FailureKind, TaskError, TaskInvocation, TaskResponse, TaskType};
