//! Error types for the licensing module.

use chrono::{DateTime, Utc};
use dm_envelope::EnvelopeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::activation::ActivationState;
use crate::codes::ActivationErrorCode;

/// Stable discriminant for every error the client reports.
///
/// Callers branch on this instead of parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Setter misuse or an operation called in the wrong order.
    Configuration,
    /// A license read before activation.
    NotActivated,
    /// Network failure or timeout.
    Transport,
    /// The server response could not be parsed or verified.
    EnvelopeParse,
    /// The server refused the license (invalid key, limit reached, revoked).
    ActivationRejected,
    /// The local clock is behind the last server sync.
    ClockTampering,
    /// The offline grace period has lapsed.
    GracePeriodExpired,
    /// The installer refused to run the update.
    InstallRejected,
    /// An update operation was called in the wrong update state.
    UpdateState,
    /// Persistent storage failed.
    Storage,
    /// Local file I/O failed.
    Io,
}

impl ErrorKind {
    /// Returns the stable name of this kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Configuration => "ConfigurationError",
            Self::NotActivated => "NotActivatedError",
            Self::Transport => "TransportError",
            Self::EnvelopeParse => "EnvelopeParseError",
            Self::ActivationRejected => "ActivationRejected",
            Self::ClockTampering => "ClockTamperingError",
            Self::GracePeriodExpired => "GracePeriodExpiredError",
            Self::InstallRejected => "InstallRejected",
            Self::UpdateState => "UpdateStateError",
            Self::Storage => "StorageError",
            Self::Io => "IoError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// A setter was called after activation started.
    #[error("configuration is locked once activation has started")]
    ConfigurationLocked,

    /// An argument was empty or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was called in a state that does not allow it.
    #[error("{operation} is not allowed in state {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the machine was in.
        state: ActivationState,
    },

    /// License not activated.
    #[error("license not activated")]
    NotActivated,

    /// Network error talking to the licensing authority.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response envelope was malformed or failed verification.
    #[error("invalid response envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    /// The server refused the request.
    #[error("activation rejected ({code}): {message}")]
    ActivationRejected {
        /// Taxonomy code for the rejection.
        code: ActivationErrorCode,
        /// Server-provided detail.
        message: String,
    },

    /// License has expired.
    #[error("license expired on {0}")]
    Expired(DateTime<Utc>),

    /// License revoked.
    #[error("license has been revoked")]
    Revoked,

    /// License suspended.
    #[error("license is suspended")]
    Suspended,

    /// Local clock earlier than the last server sync.
    #[error("system clock is behind the last server sync ({last_synced})")]
    ClockTampering {
        /// When the server last confirmed the license.
        last_synced: DateTime<Utc>,
    },

    /// No successful sync within the grace period.
    #[error("server sync grace period expired")]
    GracePeriodExpired {
        /// When the grace period ended, if known.
        expired_at: Option<DateTime<Utc>>,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Creates a server rejection with the given code.
    pub fn rejected(code: ActivationErrorCode, message: impl Into<String>) -> Self {
        Self::ActivationRejected {
            code,
            message: message.into(),
        }
    }

    /// Returns the stable kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigurationLocked | Self::InvalidArgument(_) | Self::InvalidState { .. } => {
                ErrorKind::Configuration
            }
            Self::NotActivated => ErrorKind::NotActivated,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Envelope(_) => ErrorKind::EnvelopeParse,
            Self::ActivationRejected { .. } | Self::Expired(_) | Self::Revoked | Self::Suspended => {
                ErrorKind::ActivationRejected
            }
            Self::ClockTampering { .. } => ErrorKind::ClockTampering,
            Self::GracePeriodExpired { .. } => ErrorKind::GracePeriodExpired,
            Self::Storage(_) | Self::Serialization(_) => ErrorKind::Storage,
        }
    }

    /// Returns the taxonomy code, if this error has one.
    #[must_use]
    pub fn code(&self) -> Option<ActivationErrorCode> {
        match self {
            Self::Transport(_) => Some(ActivationErrorCode::NetworkFailure),
            Self::Envelope(EnvelopeError::NotSigned | EnvelopeError::SignatureInvalid) => {
                Some(ActivationErrorCode::SignatureInvalid)
            }
            Self::Envelope(_) => Some(ActivationErrorCode::MalformedResponse),
            Self::ActivationRejected { code, .. } => Some(*code),
            Self::Expired(_) => Some(ActivationErrorCode::LicenseExpired),
            Self::Revoked => Some(ActivationErrorCode::LicenseRevoked),
            Self::Suspended => Some(ActivationErrorCode::LicenseSuspended),
            Self::ClockTampering { .. } => Some(ActivationErrorCode::ClockTampering),
            Self::GracePeriodExpired { .. } => Some(ActivationErrorCode::GracePeriodExpired),
            _ => None,
        }
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
