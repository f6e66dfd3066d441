//! Configuration store.
//!
//! Holds product identity and local settings. Every setter fails once the
//! store is locked, which happens when activation starts. Only a reset
//! unlocks it again.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{LicenseError, LicenseResult};

/// Identity of the licensed product as registered with the licensing authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductIdentity {
    /// Product identifier.
    pub product_id: String,
    /// Opaque product descriptor, forwarded verbatim.
    pub product_data: String,
    /// Feature toggle bitset.
    pub flags: u32,
}

/// Local license settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LicenseConfig {
    /// Where license state is persisted.
    pub data_directory: Option<PathBuf>,
    /// Enables verbose diagnostics.
    pub debug_mode: bool,
    /// Replaces the computed device fingerprint.
    pub custom_fingerprint: Option<String>,
}

/// Mutable configuration with an activation lock.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    identity: ProductIdentity,
    config: LicenseConfig,
    locked: bool,
}

impl ConfigStore {
    /// Creates an empty, unlocked store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_unlocked(&self) -> LicenseResult<()> {
        if self.locked {
            Err(LicenseError::ConfigurationLocked)
        } else {
            Ok(())
        }
    }

    /// Sets the opaque product descriptor.
    ///
    /// # Errors
    ///
    /// Fails if the store is locked.
    pub fn set_product_data(&mut self, data: impl Into<String>) -> LicenseResult<()> {
        self.ensure_unlocked()?;
        self.identity.product_data = data.into();
        Ok(())
    }

    /// Sets the product id and feature flags.
    ///
    /// # Errors
    ///
    /// Fails if the store is locked or `id` is blank.
    pub fn set_product_id(&mut self, id: impl AsRef<str>, flags: u32) -> LicenseResult<()> {
        self.ensure_unlocked()?;
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(LicenseError::InvalidArgument(
                "product id must not be empty".to_string(),
            ));
        }
        self.identity.product_id = id.to_string();
        self.identity.flags = flags;
        Ok(())
    }

    /// Sets the data directory.
    ///
    /// # Errors
    ///
    /// Fails if the store is locked or the path is empty.
    pub fn set_data_directory(&mut self, path: impl Into<PathBuf>) -> LicenseResult<()> {
        self.ensure_unlocked()?;
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(LicenseError::InvalidArgument(
                "data directory must not be empty".to_string(),
            ));
        }
        self.config.data_directory = Some(path);
        Ok(())
    }

    /// Enables or disables debug mode.
    ///
    /// # Errors
    ///
    /// Fails if the store is locked.
    pub fn set_debug_mode(&mut self, enabled: bool) -> LicenseResult<()> {
        self.ensure_unlocked()?;
        self.config.debug_mode = enabled;
        Ok(())
    }

    /// Overrides the device fingerprint. A blank value restores the default.
    ///
    /// # Errors
    ///
    /// Fails if the store is locked.
    pub fn set_custom_fingerprint(&mut self, fingerprint: impl AsRef<str>) -> LicenseResult<()> {
        self.ensure_unlocked()?;
        let fingerprint = fingerprint.as_ref().trim();
        self.config.custom_fingerprint =
            (!fingerprint.is_empty()).then(|| fingerprint.to_string());
        Ok(())
    }

    /// Seeds values that no setter has provided yet.
    ///
    /// Explicit setter calls always win, before or after seeding.
    pub fn apply_defaults(&mut self, product_id: Option<&str>, data_directory: Option<&Path>) {
        if self.identity.product_id.is_empty()
            && let Some(id) = product_id.map(str::trim).filter(|id| !id.is_empty())
        {
            self.identity.product_id = id.to_string();
        }
        if self.config.data_directory.is_none()
            && let Some(dir) = data_directory.filter(|d| !d.as_os_str().is_empty())
        {
            self.config.data_directory = Some(dir.to_path_buf());
        }
    }

    /// Returns the product identity once a product id is known.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidArgument`] when no product id is set.
    pub fn identity(&self) -> LicenseResult<&ProductIdentity> {
        if self.identity.product_id.is_empty() {
            return Err(LicenseError::InvalidArgument(
                "product id has not been set".to_string(),
            ));
        }
        Ok(&self.identity)
    }

    /// Returns the local settings.
    #[must_use]
    pub fn config(&self) -> &LicenseConfig {
        &self.config
    }

    /// Returns the data directory, if any.
    #[must_use]
    pub fn data_directory(&self) -> Option<&Path> {
        self.config.data_directory.as_deref()
    }

    /// Returns true when debug mode is on.
    #[must_use]
    pub fn debug_mode(&self) -> bool {
        self.config.debug_mode
    }

    /// Returns true once activation has started.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn lock(&mut self) {
        self.locked = true;
    }

    pub(crate) fn unlock(&mut self) {
        self.locked = false;
    }
}
