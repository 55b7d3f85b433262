//! Provider Layer
//!
//! Boundary to the telemetry providers a collection job polls. Vendor clients
//! live outside this crate and plug in through [`MetricProvider`]; the agent
//! ships a dependency-free [`TcpProbeProvider`].
//!
//! # Components
//!
//! - [`MetricProvider`]: One fetch per (host, window), invoked through the fan-out executor
//! - [`ProviderRegistry`]: Name to provider lookup used when a job is built
//! - [`SecretResolver`]: Decrypts credential fields before queries are built
//! - [`TcpProbeProvider`]: TCP connect latency per rendered `host:port` target

mod secret;
pub mod tcp;
mod traits;

pub use secret::{EnvSecretResolver, SecretError, SecretResolver};
pub use tcp::{ProbeError, TcpProbeProvider, probe};
pub use traits::{
    Credentials, HOST_PLACEHOLDER, MetricProvider, MetricSample, ProviderError, ProviderQuery,
    ProviderRegistry, render_query,
};
