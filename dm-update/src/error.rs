//! Error types for the update lifecycle.

use dm_envelope::EnvelopeError;
use dm_license::{ErrorCategory, ErrorDetail, ErrorKind};
use thiserror::Error;

use crate::state::UpdateState;

/// Update lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    /// Operation called in a state that does not allow it.
    #[error("{operation} is not allowed in update state {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the machine was in.
        state: UpdateState,
    },

    /// Network error talking to the update service.
    #[error("transport error: {0}")]
    Transport(String),

    /// The update response could not be parsed.
    #[error("invalid update envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    /// The update service returned an error status.
    #[error("update service returned status {status}: {message}")]
    ServiceError {
        /// HTTP-equivalent status.
        status: u16,
        /// Response detail.
        message: String,
    },

    /// The downloaded package digest did not match.
    #[error("package digest mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// Digest from the update envelope.
        expected: String,
        /// Digest of the received bytes.
        actual: String,
    },

    /// The installer refused to run.
    #[error("install rejected: {0}")]
    InstallRejected(String),

    /// Local file I/O failed.
    #[error("i/o error: {0}")]
    Io(String),
}

impl UpdateError {
    /// Returns the stable kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidState { .. } => ErrorKind::UpdateState,
            Self::Transport(_) | Self::ServiceError { .. } => ErrorKind::Transport,
            Self::Envelope(_) | Self::IntegrityMismatch { .. } => ErrorKind::EnvelopeParse,
            Self::InstallRejected(_) => ErrorKind::InstallRejected,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Converts to an inspectable detail for `lastError`.
    #[must_use]
    pub fn detail(&self) -> ErrorDetail {
        ErrorDetail::new(ErrorCategory::Update, self.kind(), self.to_string())
    }
}

impl From<std::io::Error> for UpdateError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type for update operations.
pub type UpdateResult<T> = Result<T, UpdateError>;
