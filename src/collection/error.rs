//! Collection error types.

use thiserror::Error;

use super::fanout::FanoutError;
use crate::provider::ProviderError;

/// Message reported when a job fails because its results could not be saved.
pub const PERSIST_FAILURE_MESSAGE: &str = "could not persist results";

/// Errors that can occur while running a collection cycle.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// A provider fetch failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The fetch fan-out aborted.
    #[error("fetch fan-out failed: {0}")]
    Fanout(#[from] FanoutError<ProviderError>),

    /// The sink did not accept the cycle's records.
    #[error("could not persist results: {0}")]
    Persist(String),

    /// Job configuration is unusable.
    #[error("config error: {0}")]
    Config(String),

    /// Scheduler misuse (e.g., starting twice).
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl CollectionError {
    /// Whether retrying the same cycle can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(_) | Self::Fanout(_) | Self::Persist(_))
    }

    /// Whether the sink refused the results.
    pub fn is_persist(&self) -> bool {
        matches!(self, Self::Persist(_))
    }
}
