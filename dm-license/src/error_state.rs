//! The `lastError` / `lastActivationError` slots.
//!
//! Slots are overwritten by failures and cleared only by `reset` or by a
//! later success in the same category.

use serde::Serialize;

use crate::codes::ActivationErrorCode;
use crate::error::{ErrorKind, LicenseError};

/// Which family of operations produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    /// Configuration setters and key entry.
    Configuration,
    /// `activate_license`.
    Activation,
    /// Genuine/valid checks and metadata reads.
    Validation,
    /// Update lifecycle operations.
    Update,
}

/// An inspectable error detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    /// Operation family.
    pub category: ErrorCategory,
    /// Stable kind.
    pub kind: ErrorKind,
    /// Taxonomy code, when one applies.
    pub code: Option<ActivationErrorCode>,
    /// Human-readable message. Never parse this.
    pub message: String,
}

impl ErrorDetail {
    /// Creates a detail without a taxonomy code.
    pub fn new(category: ErrorCategory, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            category,
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Builds a detail from a license error.
    #[must_use]
    pub fn from_error(category: ErrorCategory, err: &LicenseError) -> Self {
        Self {
            category,
            kind: err.kind(),
            code: err.code(),
            message: err.to_string(),
        }
    }
}

/// The last activation failure: a code plus optional detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationFailure {
    /// Taxonomy code.
    pub code: ActivationErrorCode,
    /// Server or local detail.
    pub detail: Option<String>,
}

impl ActivationFailure {
    /// Returns the stable name of the code.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.code.name()
    }
}

/// Holds the two error slots.
#[derive(Debug, Clone, Default)]
pub struct ErrorState {
    last_error: Option<ErrorDetail>,
    last_activation_error: Option<ActivationFailure>,
}

impl ErrorState {
    /// Creates empty slots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites `lastError`.
    pub fn record(&mut self, detail: ErrorDetail) {
        self.last_error = Some(detail);
    }

    /// Overwrites `lastError` from a license error.
    pub fn record_error(&mut self, category: ErrorCategory, err: &LicenseError) {
        self.record(ErrorDetail::from_error(category, err));
    }

    /// Records an activation failure in both slots.
    ///
    /// Errors without a taxonomy code only reach `lastError`.
    pub fn record_activation_failure(&mut self, err: &LicenseError) {
        self.record_error(ErrorCategory::Activation, err);
        if let Some(code) = err.code() {
            let detail = match err {
                LicenseError::ActivationRejected { message, .. } if !message.is_empty() => {
                    Some(message.clone())
                }
                LicenseError::ActivationRejected { .. } => None,
                other => Some(other.to_string()),
            };
            self.last_activation_error = Some(ActivationFailure { code, detail });
        }
    }

    /// Clears `lastError` if it belongs to `category`.
    pub fn clear_category(&mut self, category: ErrorCategory) {
        if self
            .last_error
            .as_ref()
            .is_some_and(|e| e.category == category)
        {
            self.last_error = None;
        }
        if category == ErrorCategory::Activation {
            self.last_activation_error = None;
        }
    }

    /// Clears both slots.
    pub fn clear(&mut self) {
        self.last_error = None;
        self.last_activation_error = None;
    }

    /// Returns `lastError`.
    #[must_use]
    pub fn last_error(&self) -> Option<&ErrorDetail> {
        self.last_error.as_ref()
    }

    /// Returns `lastActivationError`.
    #[must_use]
    pub fn last_activation_error(&self) -> Option<&ActivationFailure> {
        self.last_activation_error.as_ref()
    }
}
