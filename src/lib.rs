//! Delegate Agent - Remote Task Execution and Telemetry Collection
//!
//! This crate provides the core of a delegate agent: it receives task
//! invocations, routes them to typed handlers and runs long-lived metric
//! collection jobs whose results are written to a local sink. It can be used
//! as a library, or run as a standalone binary with the `delegate-agent`
//! executable.
//!
//! # Architecture
//!
//! - **Task**: Invocation model, dispatcher and duplicate-execution guard
//! - **Collection**: Periodic scheduler, retrying cycle runner, parallel fan-out and job registry
//! - **Metric**: Normalized records and per-minute aggregation
//! - **Provider**: Metric provider abstraction, TCP probe provider and secret resolution
//! - **Sink**: Single-writer JSONL file sink and in-memory sink
//! - **Config**: YAML configuration with environment expansion
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use delegate_agent::collection::{CollectionTaskHandler, JobRegistry};
//! use delegate_agent::provider::{EnvSecretResolver, ProviderRegistry, TcpProbeProvider};
//! use delegate_agent::sink::SinkBuilder;
//! use delegate_agent::task::{HandlerRegistry, TaskDispatcher, TaskInvocation, TaskType};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let sink = SinkBuilder::new("./data").build()?;
//! let registry = JobRegistry::new();
//! let collection = CollectionTaskHandler::new(
//!     ProviderRegistry::new().with(TcpProbeProvider::default()),
//!     Arc::new(EnvSecretResolver::new()),
//!     Arc::new(sink.writer.clone()),
//!     registry.clone(),
//! );
//! let dispatcher = TaskDispatcher::new(
//!     HandlerRegistry::new().with(TaskType::MetricCollection, Arc::new(collection)),
//! );
//!
//! let invocation = TaskInvocation::new("task-1", TaskType::MetricCollection)
//!     .with_parameters(serde_json::json!({
//!         "provider": "tcp",
//!         "query": "${host}:443",
//!         "hosts": {"example.com": "web"},
//!         "collection_total_minutes": 5,
//!         "always_on": true,
//!     }));
//! let response = dispatcher.execute(invocation, |_| true, |_, _| {}).await;
//! println!("{response:?}");
//!
//! registry.shutdown().await;
//! sink.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod config;
pub mod metric;
pub mod provider;
pub mod sink;
pub mod task;

pub use collection::{CollectionError, CollectionTaskHandler, JobRegistry};
pub use config::{AgentConfig, ConfigError};
pub use metric::{AggregationTable, MetricRecord};
pub use provider::{MetricProvider, ProviderRegistry};
pub use sink::{MetricSink, SinkBuilder, SinkHandles, SinkWriter};
pub use task::{TaskDispatcher, TaskInvocation, TaskResponse, TaskType};
