//! Delegate Agent Binary Entry Point
//!
//! Reads task invocations as JSON lines (from a file or stdin), dispatches
//! them and prints one JSON response line per dispatched task to stdout.
//! Logs go to stderr. Core functionality is provided by the `delegate_agent`
//! library crate.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use delegate_agent::{
    collection::{CollectionTaskHandler, JobRegistry},
    config::{AgentConfig, parse_duration},
    provider::{EnvSecretResolver, ProviderRegistry, TcpProbeProvider},
    task::{
        ConnectivityCheckHandler, ExecutingTasks, HandlerRegistry, TaskDispatcher, TaskHandler,
        TaskInvocation, TaskResponse, TaskType,
    },
};
use serde_json::json;
use strum::IntoEnumIterator;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::{JoinHandle, JoinSet};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Delegate Agent - remote task execution with periodic telemetry collection
#[derive(Parser, Debug)]
#[command(name = "delegate-agent", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long, env = "DELEGATE_CONFIG")]
    config: Option<PathBuf>,

    /// File with one JSON task invocation per line (default: stdin)
    #[arg(short, long, env = "DELEGATE_TASKS")]
    tasks: Option<PathBuf>,

    /// Sink directory (overrides config file)
    #[arg(long, env = "DELEGATE_SINK_DIR")]
    sink_dir: Option<PathBuf>,

    /// Collection period, e.g. `30s` (overrides config file)
    #[arg(long, env = "DELEGATE_PERIOD", value_parser = parse_duration)]
    period: Option<Duration>,
}

type TaskHandle = JoinHandle<Option<TaskResponse>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,delegate_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            AgentConfig::load(path)?
        }
        None => AgentConfig::default(),
    };

    // CLI > ENV > config file
    if let Some(dir) = cli.sink_dir {
        config.sink.dir = dir;
    }
    if let Some(period) = cli.period {
        config.collection.period = period;
    }
    config.validate()?;

    tracing::info!(
        sink_dir = %config.sink.dir.display(),
        period = %humantime::format_duration(config.collection.period),
        initial_delay = %humantime::format_duration(config.collection.initial_delay),
        "Delegate agent starting"
    );

    let sink = config.sink.builder().build()?;
    let writer = Arc::new(sink.writer.clone());
    let registry = JobRegistry::new();

    let providers = ProviderRegistry::new().with(TcpProbeProvider::new(config.agent.probe_timeout));
    let collection = CollectionTaskHandler::new(
        providers,
        Arc::new(EnvSecretResolver::new()),
        writer.clone(),
        registry.clone(),
    )
    .with_audit_log(writer)
    .with_settings(config.collection.settings());

    let collection: Arc<dyn TaskHandler> = Arc::new(collection);
    let mut handlers = HandlerRegistry::new().with(
        TaskType::ConnectivityCheck,
        Arc::new(ConnectivityCheckHandler::new()),
    );
    for task_type in TaskType::iter().filter(TaskType::is_collection) {
        handlers.register(task_type, Arc::clone(&collection));
    }
    let dispatcher = TaskDispatcher::new(handlers);
    let executing = ExecutingTasks::new();

    let input: Box<dyn AsyncRead + Unpin + Send> = match &cli.tasks {
        Some(path) => Box::new(tokio::fs::File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(input).lines();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut in_flight: JoinSet<Option<TaskResponse>> = JoinSet::new();
    let mut sync_task: Option<TaskHandle> = None;
    let mut input_open = true;

    loop {
        if !input_open && sync_task.is_none() && in_flight.is_empty() {
            tracing::info!("Input closed and all tasks finished");
            break;
        }

        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line(), if input_open && sync_task.is_none() => match line {
                Ok(Some(line)) => {
                    let Some(invocation) = parse_invocation(&line) else {
                        continue;
                    };
                    let is_async = invocation.is_async;
                    let handle = dispatcher.submit(
                        invocation,
                        precondition(executing.clone()),
                        report(executing.clone()),
                    );
                    if is_async {
                        in_flight.spawn(async move { handle.await.ok().flatten() });
                    } else {
                        sync_task = Some(handle);
                    }
                }
                Ok(None) => input_open = false,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read task input");
                    input_open = false;
                }
            },
            _ = join_sync(&mut sync_task) => {}
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    tracing::warn!(error = %e, "Background task ended abnormally");
                }
            }
        }
    }

    tracing::info!(
        job_count = registry.job_count(),
        "Shutting down collection jobs..."
    );
    registry
        .shutdown_with_timeout(config.agent.shutdown_timeout)
        .await;

    if sync_task.is_some() {
        join_sync(&mut sync_task).await;
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Shutting down sink...");
    tokio::task::spawn_blocking(move || sink.shutdown()).await??;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn parse_invocation(line: &str) -> Option<TaskInvocation> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<TaskInvocation>(line) {
        Ok(invocation) => Some(invocation),
        Err(e) => {
            tracing::error!(error = %e, "Ignoring malformed task invocation");
            None
        }
    }
}

/// Refuse task ids that are already executing.
fn precondition(executing: ExecutingTasks) -> impl FnOnce(&TaskInvocation) -> bool + Send + 'static {
    move |invocation: &TaskInvocation| executing.try_begin(invocation)
}

/// Release the task id and print the response line.
fn report(
    executing: ExecutingTasks,
) -> impl FnOnce(&TaskInvocation, &TaskResponse) + Send + 'static {
    move |invocation: &TaskInvocation, response: &TaskResponse| {
        executing.finish(&invocation.task_id);
        let line = json!({
            "task_id": invocation.task_id,
            "response": response,
        });
        println!("{line}");
    }
}

/// Wait for the running synchronous task; pending forever when there is none.
async fn join_sync(task: &mut Option<TaskHandle>) {
    let Some(handle) = task.as_mut() else {
        return std::future::pending().await;
    };
    let joined = handle.await;
    *task = None;
    if let Err(e) = joined {
        tracing::warn!(error = %e, "Task ended abnormally");
    }
}

/// Setup graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }
}
