//! Client options.

use dm_license::GenuinePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-call timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Longest allowed cancellation poll interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest allowed cancellation poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Endpoints of the licensing authority and update service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Activation endpoint.
    pub activate: String,
    /// Validation endpoint.
    pub validate: String,
    /// Update check endpoint.
    pub updates: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            activate: "/v1/licenses/activate".to_string(),
            validate: "/v1/licenses/validate".to_string(),
            updates: "/v1/updates/check".to_string(),
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Endpoint paths passed to the transport.
    pub endpoints: Endpoints,
    /// Per-call timeout.
    pub timeout: Duration,
    /// Genuine-check policy.
    pub policy: GenuinePolicy,
    /// Bytes requested per download chunk.
    pub chunk_size: u64,
    /// How often an in-flight download checks for cancellation.
    ///
    /// Clamped to [`MIN_POLL_INTERVAL`]..=[`MAX_POLL_INTERVAL`].
    pub poll_interval: Duration,
    /// Version of the host application, sent with every request.
    pub app_version: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            policy: GenuinePolicy::default(),
            chunk_size: 256 * 1024,
            poll_interval: Duration::from_millis(200),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ClientOptions {
    /// Returns the poll interval clamped to
    /// [`MIN_POLL_INTERVAL`]..=[`MAX_POLL_INTERVAL`].
    #[must_use]
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
    }
}

/// Options for `check_for_updates` and `download_update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOptions {
    /// Release channel, such as `stable` or `beta`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

/// Options for `quit_and_install`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallOptions {
    /// Arguments the installer passes to the restarted application.
    #[serde(default)]
    pub restart_args: Vec<String>,
}
