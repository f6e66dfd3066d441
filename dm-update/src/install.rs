//! Installer outcomes.

use serde::Serialize;
use std::path::PathBuf;

/// What the installer collaborator reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The installer was launched; the host should exit.
    Launched,
    /// Install preconditions were not met.
    Refused(String),
    /// The installer could not be started.
    Failed(String),
}

/// Result of `quit_and_install`.
///
/// Never an error: callers branch on the variant to decide whether to exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QuitAndInstallResult {
    /// The installer is running. The process should exit now.
    Accepted {
        /// Package handed to the installer.
        package: PathBuf,
    },
    /// A business rule refused the install. Details are in `lastError`.
    Rejected {
        /// Why the install was refused.
        reason: String,
    },
    /// The installer could not be launched.
    Failed {
        /// What went wrong.
        error: String,
    },
}

impl QuitAndInstallResult {
    /// Returns true if the host process should exit.
    #[must_use]
    pub fn should_exit(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// Returns the numeric form: `1` accepted, `0` rejected, `-1` failed.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Accepted { .. } => 1,
            Self::Rejected { .. } => 0,
            Self::Failed { .. } => -1,
        }
    }
}
