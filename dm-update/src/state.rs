use serde::{Deserialize, Serialize};
use std::fmt;

/// Update lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateState {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Querying the update service.
    Checking,
    /// A newer version is available.
    UpdateAvailable,
    /// Package download in progress.
    Downloading,
    /// Package downloaded and ready to install.
    Downloaded,
    /// The last check or download failed.
    Failed,
    /// The installer has been handed the package.
    Installing,
}

impl UpdateState {
    /// Returns the stable name of this state.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Checking => "Checking",
            Self::UpdateAvailable => "UpdateAvailable",
            Self::Downloading => "Downloading",
            Self::Downloaded => "Downloaded",
            Self::Failed => "Failed",
            Self::Installing => "Installing",
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
