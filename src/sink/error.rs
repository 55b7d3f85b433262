//! Sink-specific error types.
//!
//! All sink operations return [`SinkError`] on failure, which can be
//! matched to determine the underlying cause (file, channel, encoding, etc.).

use thiserror::Error;

/// Errors that can occur in the sink layer.
#[derive(Debug, Error)]
pub enum SinkError {
    /// File operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to send command to writer actor.
    #[error("failed to send command to writer actor")]
    ChannelSend,

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (e.g., thread join failure, lost reply).
    #[error("internal error: {0}")]
    Internal(String),
}
