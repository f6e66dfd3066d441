//! Callback dispatch.
//!
//! Each slot holds at most one callback. Setting a new one replaces the
//! old; setting `None` unregisters. Callbacks are cloned out of the slot
//! and invoked after every client lock is released, so a callback may
//! call back into the client.

use dm_update::DownloadProgress;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// License status delivered to the license callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseStatus {
    /// Result of the genuine check.
    pub genuine: bool,
    /// Result of the validity check.
    pub valid: bool,
}

/// Invoked when a background check changes the license status.
pub type LicenseCallback = Arc<dyn Fn(LicenseStatus) + Send + Sync>;

/// Invoked as download progress arrives.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;

/// A single replaceable callback.
pub struct CallbackSlot<F: ?Sized> {
    inner: Mutex<Option<Arc<F>>>,
}

impl<F: ?Sized> Default for CallbackSlot<F> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }
}

impl<F: ?Sized> CallbackSlot<F> {
    /// Replaces the callback. `None` unregisters.
    pub fn set(&self, callback: Option<Arc<F>>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    /// Returns the current callback without holding the slot lock.
    #[must_use]
    pub fn get(&self) -> Option<Arc<F>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true if a callback is registered.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}

impl<F: ?Sized> fmt::Debug for CallbackSlot<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSlot")
            .field("registered", &self.is_set())
            .finish()
    }
}
