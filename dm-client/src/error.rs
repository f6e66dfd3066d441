//! Error types for collaborators.

use dm_license::LicenseError;
use dm_update::UpdateError;
use thiserror::Error;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The call did not finish within its timeout.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The call was cancelled through its token.
    #[error("request cancelled")]
    Cancelled,

    /// Connection or protocol failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The endpoint is not configured.
    #[error("no endpoint configured for {0}")]
    NoEndpoint(&'static str),
}

impl From<TransportError> for LicenseError {
    fn from(err: TransportError) -> Self {
        LicenseError::Transport(err.to_string())
    }
}

impl From<TransportError> for UpdateError {
    fn from(err: TransportError) -> Self {
        UpdateError::Transport(err.to_string())
    }
}

/// Persistent store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error.
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be decoded.
    #[error("corrupt stored state: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<StoreError> for LicenseError {
    fn from(err: StoreError) -> Self {
        LicenseError::Storage(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
