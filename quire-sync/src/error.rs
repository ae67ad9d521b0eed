//! Error types for the sync layer.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No connectivity; no network call was attempted.
    #[error("Offline")]
    Offline,

    /// Sync is switched off in the vault's config.
    #[error("Sync disabled")]
    Disabled,

    /// Network error (the transport rejected the call).
    #[error("network error: {0}")]
    Network(String),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Protocol error (malformed or inconsistent response).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local persistence failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// True for failures that a later cycle may succeed at without any change
    /// on our side.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Offline)
    }
}
