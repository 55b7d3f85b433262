//! Core provider traits and types.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder a query template must contain; replaced by each host name.
pub const HOST_PLACEHOLDER: &str = "${host}";

/// Errors a provider fetch can fail with.
///
/// All provider errors are transient from the job's point of view and are
/// retried by the cycle runner.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network I/O error.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Provider did not answer in time.
    #[error("timeout elapsed")]
    Timeout,

    /// Provider answered with an error.
    #[error("request failed: {0}")]
    Request(String),

    /// Provider answered with something that could not be normalized.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Decrypted credential fields.
///
/// `Debug` never prints values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials(BTreeMap<String, String>);

impl Credentials {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self(fields)
    }

    /// Get one decrypted field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.0.keys()).finish()
    }
}

/// One fetch request for a single host over one collection window.
#[derive(Debug, Clone)]
pub struct ProviderQuery {
    /// Host the query targets.
    pub host: String,
    /// Group the host belongs to.
    pub group: String,
    /// Query rendered from the job template for this host.
    pub query: String,
    /// Inclusive window start.
    pub window_start: DateTime<Utc>,
    /// Exclusive window end.
    pub window_end: DateTime<Utc>,
    /// Decrypted credentials of the job.
    pub credentials: Arc<Credentials>,
}

/// One raw data point returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name as the provider reports it.
    pub name: String,
    /// Observation time in Unix milliseconds.
    pub timestamp_ms: i64,
    /// Sub-metric name to value.
    pub values: BTreeMap<String, f64>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            name: name.into(),
            timestamp_ms,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Reject samples that cannot be stored: non-finite values or a
    /// negative timestamp.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.timestamp_ms < 0 {
            return Err(ProviderError::InvalidResponse(format!(
                "{}: negative timestamp {}",
                self.name, self.timestamp_ms
            )));
        }
        match self.values.iter().find(|(_, v)| !v.is_finite()) {
            Some((key, value)) => Err(ProviderError::InvalidResponse(format!(
                "{}.{key} is {value}",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

/// A telemetry provider polled by collection jobs.
///
/// # Returns
///
/// - `Ok(Some(samples))`: Data for the window
/// - `Ok(None)`: Provider answered but had nothing for the window
/// - `Err(_)`: The fetch failed; the whole cycle is retried
#[async_trait::async_trait]
pub trait MetricProvider: Send + Sync + 'static {
    /// Registry name (e.g., "tcp", "newrelic").
    fn name(&self) -> &str;

    /// Fetch samples for one host and window.
    async fn fetch(&self, query: &ProviderQuery) -> Result<Option<Vec<MetricSample>>, ProviderError>;
}

/// Render a query template for one host.
///
/// # Errors
/// Returns the template back as the error if it lacks [`HOST_PLACEHOLDER`].
pub fn render_query(template: &str, host: &str) -> Result<String, String> {
    if !template.contains(HOST_PLACEHOLDER) {
        return Err(format!(
            "query template '{template}' is missing the {HOST_PLACEHOLDER} placeholder"
        ));
    }
    Ok(template.replace(HOST_PLACEHOLDER, host))
}

/// Providers available to collection jobs, by name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn MetricProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider, replacing any provider registered under the same name.
    pub fn with(mut self, provider: impl MetricProvider) -> Self {
        self.register(Arc::new(provider));
        self
    }

    /// Add a shared provider.
    pub fn register(&mut self, provider: Arc<dyn MetricProvider>) {
        let name = provider.name().to_string();
        if self.providers.insert(name.clone(), provider).is_some() {
            tracing::warn!(provider = %name, "Provider replaced");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MetricProvider>> {
        self.providers.get(name).cloned()
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}
