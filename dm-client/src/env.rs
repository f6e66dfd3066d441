//! Environment configuration.
//!
//! Launchers and development tooling pass settings through environment
//! variables. They seed configuration defaults only; explicit setter calls
//! on the client always win.

use std::path::PathBuf;

/// Data path override.
pub const ENV_DM_API_PATH: &str = "DM_API_PATH";
/// Default product id.
pub const ENV_DM_APP_ID: &str = "DM_APP_ID";
/// Licensing authority public key.
pub const ENV_DM_PUBLIC_KEY: &str = "DM_PUBLIC_KEY";
/// Launcher endpoint.
pub const ENV_DM_LAUNCHER_ENDPOINT: &str = "DM_LAUNCHER_ENDPOINT";
/// Launcher bearer token.
pub const ENV_DM_LAUNCHER_TOKEN: &str = "DM_LAUNCHER_TOKEN";

/// Settings read from the environment.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    /// Overrides the default data directory.
    pub data_path_override: Option<PathBuf>,
    /// Default product id.
    pub default_app_id: Option<String>,
    /// Default licensing authority public key.
    pub default_public_key: Option<String>,
    /// Launcher endpoint, when started by the launcher.
    pub launcher_endpoint: Option<String>,
    /// Launcher token.
    pub launcher_token: Option<String>,
}

impl EnvConfig {
    /// Reads the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads settings through `lookup`. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            data_path_override: get(ENV_DM_API_PATH).map(PathBuf::from),
            default_app_id: get(ENV_DM_APP_ID),
            default_public_key: get(ENV_DM_PUBLIC_KEY),
            launcher_endpoint: get(ENV_DM_LAUNCHER_ENDPOINT),
            launcher_token: get(ENV_DM_LAUNCHER_TOKEN),
        }
    }

    /// Returns true when both launcher endpoint and token are present.
    #[must_use]
    pub fn has_launcher(&self) -> bool {
        self.launcher_endpoint.is_some() && self.launcher_token.is_some()
    }
}

impl std::fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvConfig")
            .field("data_path_override", &self.data_path_override)
            .field("default_app_id", &self.default_app_id)
            .field("default_public_key", &self.default_public_key.is_some())
            .field("launcher_endpoint", &self.launcher_endpoint)
            .field("launcher_token", &self.launcher_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Returns the default data directory for `product_id`.
///
/// The platform local data directory joined with the product id.
#[must_use]
pub fn default_data_directory(product_id: &str) -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(product_id))
}
