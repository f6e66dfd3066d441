//! Development license check.
//!
//! During development the vendor CLI writes the app's public key under
//! `~/.distromate-cli/dev_licenses/<app_id>/pubkey`. When that key matches
//! the configured one, the application may skip license checks. Launching
//! through the launcher always enforces checks.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::env::EnvConfig;

/// Message shown when the development license is unusable.
pub const DEV_LICENSE_ERROR: &str = "Development license is missing or corrupted. \
     Run `distromate sdk renew` to regenerate the dev certificate.";

/// Dev-license check failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DevLicenseError {
    /// No app id or public key available.
    #[error(
        "App identity is required for dev-license checks. \
         Provide app_id/public_key or set DM_APP_ID and DM_PUBLIC_KEY."
    )]
    MissingIdentity,

    /// The dev key file is missing, unreadable or does not match.
    #[error("{}", DEV_LICENSE_ERROR)]
    Invalid,
}

/// Returns the dev key path for `app_id` under `home`.
#[must_use]
pub fn dev_pubkey_path(home: &Path, app_id: &str) -> PathBuf {
    home.join(".distromate-cli")
        .join("dev_licenses")
        .join(app_id)
        .join("pubkey")
}

/// Decides whether license checks may be skipped on this machine.
///
/// Explicit arguments take precedence over environment defaults.
///
/// # Errors
///
/// Fails when no identity is available, or when the dev key is missing or
/// does not match.
pub fn should_skip_check(
    env: &EnvConfig,
    app_id: Option<&str>,
    public_key: Option<&str>,
) -> Result<bool, DevLicenseError> {
    let home = dirs::home_dir().ok_or(DevLicenseError::Invalid)?;
    should_skip_check_in(&home, env, app_id, public_key)
}

/// [`should_skip_check`] with an explicit home directory.
///
/// # Errors
///
/// See [`should_skip_check`].
pub fn should_skip_check_in(
    home: &Path,
    env: &EnvConfig,
    app_id: Option<&str>,
    public_key: Option<&str>,
) -> Result<bool, DevLicenseError> {
    if env.has_launcher() {
        return Ok(false);
    }

    let non_blank = |s: &&str| !s.trim().is_empty();
    let app_id = app_id
        .filter(non_blank)
        .or(env.default_app_id.as_deref())
        .ok_or(DevLicenseError::MissingIdentity)?;
    let public_key = public_key
        .filter(non_blank)
        .or(env.default_public_key.as_deref())
        .ok_or(DevLicenseError::MissingIdentity)?;

    let stored = std::fs::read_to_string(dev_pubkey_path(home, app_id))
        .map_err(|_| DevLicenseError::Invalid)?;
    let stored = stored.trim();
    if stored.is_empty() || stored != public_key.trim() {
        return Err(DevLicenseError::Invalid);
    }
    Ok(true)
}
