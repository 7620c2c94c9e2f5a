//! Error types for virtmon.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for virtmon operations.
pub type Result<T> = std::result::Result<T, VirtmonError>;

/// Main error type for virtmon.
#[derive(Error, Debug)]
pub enum VirtmonError {
    // Hypervisor fetch errors
    #[error("Transient fetch failure during {operation}: {reason}")]
    TransientFetch { operation: String, reason: String },

    #[error("Stale handle: {handle}")]
    HandleStale { handle: String },

    // Event registration errors
    #[error("Event registration exhausted: {reason}")]
    RegistrationExhausted { reason: String },

    #[error("Watch not found: {id}")]
    WatchNotFound { id: u64 },

    #[error("Timer not found: {id}")]
    TimerNotFound { id: u64 },

    #[error("Event loop has stopped")]
    EventLoopStopped,

    // Connection errors
    #[error("Connection {connection} is not active")]
    NotConnected { connection: String },

    #[error("Failed to connect to {uri}: {reason}")]
    ConnectFailed { uri: String, reason: String },

    #[error("Unsupported connection URI: {uri}")]
    UnsupportedUri { uri: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VirtmonError {
    /// Create an Internal error from any error type.
    pub fn internal(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Internal(err.to_string())
    }

    /// Shorthand for a transient fetch failure.
    pub fn transient(operation: &str, reason: impl ToString) -> Self {
        Self::TransientFetch { operation: operation.to_string(), reason: reason.to_string() }
    }

    /// Whether a tick hitting this error should simply be retried next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch { .. } | Self::NotConnected { .. })
    }

    /// Whether this error means the object behind a handle went away.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::HandleStale { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(VirtmonError::transient("list_active_ids", "timeout").is_transient());
        assert!(!VirtmonError::transient("list_active_ids", "timeout").is_stale());
        assert!(VirtmonError::HandleStale { handle: "domain#1".into() }.is_stale());
        assert!(!VirtmonError::WatchNotFound { id: 3 }.is_transient());
    }

    #[test]
    fn test_display() {
        let err = VirtmonError::TransientFetch {
            operation: "get_host_info".into(),
            reason: "connection reset".into(),
        };
        assert_eq!(err.to_string(), "Transient fetch failure during get_host_info: connection reset");
    }
}
