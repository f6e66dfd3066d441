//! Update lifecycle state machine.
//!
//! Pure engine, driven by the orchestrator. Every transition bumps a
//! sequence number so waiters can tell whether they missed a change.
//!
//! ```text
//! Idle/Failed ─▶ Checking ─▶ UpdateAvailable ─▶ Downloading ─▶ Downloaded ─▶ Installing
//!                  │  │                           │    │            ▲  │
//!                  │  └─▶ Idle (no update)        │    └─▶ Failed   │  └─(rejected)
//!                  └────▶ Failed                  └─(cancel)─▶ Idle └────┘
//! ```

use serde::Serialize;
use std::path::PathBuf;

use crate::error::{UpdateError, UpdateResult};
use crate::info::{PostUpdateNotice, UpdateInfo};
use crate::install::{InstallOutcome, QuitAndInstallResult};
use crate::state::UpdateState;

/// Bytes received so far for the current download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    /// Bytes received.
    pub received: u64,
    /// Expected total.
    pub total: u64,
}

/// Handed out by [`UpdateMachine::begin_download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTicket {
    /// Identifies this download; stale tickets are ignored.
    pub generation: u64,
    /// The update being downloaded.
    pub info: UpdateInfo,
}

/// A point-in-time view of the machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSnapshot {
    /// Current state.
    pub state: UpdateState,
    /// Transition counter.
    pub sequence: u64,
    /// Update found by the last check.
    pub available: Option<UpdateInfo>,
    /// Download progress while downloading.
    pub progress: Option<DownloadProgress>,
    /// Downloaded package path.
    pub package: Option<PathBuf>,
    /// Reason for the last failure.
    pub failure: Option<String>,
}

/// The update engine.
#[derive(Debug, Default)]
pub struct UpdateMachine {
    state: UpdateState,
    sequence: u64,
    generation: u64,
    available: Option<UpdateInfo>,
    progress: Option<DownloadProgress>,
    package: Option<PathBuf>,
    failure: Option<String>,
    notice: Option<PostUpdateNotice>,
}

impl UpdateMachine {
    /// Creates an idle machine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Returns the transition counter.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the update found by the last check.
    #[must_use]
    pub fn available(&self) -> Option<&UpdateInfo> {
        self.available.as_ref()
    }

    /// Returns the current view.
    #[must_use]
    pub fn snapshot(&self) -> UpdateSnapshot {
        UpdateSnapshot {
            state: self.state,
            sequence: self.sequence,
            available: self.available.clone(),
            progress: self.progress,
            package: self.package.clone(),
            failure: self.failure.clone(),
        }
    }

    fn transition(&mut self, to: UpdateState) {
        self.state = to;
        self.sequence += 1;
    }

    fn invalid(&self, operation: &'static str) -> UpdateError {
        UpdateError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn fail(&mut self, err: &UpdateError) {
        self.failure = Some(err.to_string());
        self.progress = None;
        self.transition(UpdateState::Failed);
    }

    // ── Check ───────────────────────────────────────────────────

    /// Enters `Checking`.
    ///
    /// # Errors
    ///
    /// Fails unless the machine is `Idle` or `Failed`.
    pub fn begin_check(&mut self) -> UpdateResult<()> {
        if !matches!(self.state, UpdateState::Idle | UpdateState::Failed) {
            return Err(self.invalid("check_for_updates"));
        }
        self.available = None;
        self.failure = None;
        self.transition(UpdateState::Checking);
        Ok(())
    }

    /// Applies a check result.
    ///
    /// A "no update" answer returns to `Idle` and is not an error.
    ///
    /// # Errors
    ///
    /// Returns the check failure after entering `Failed`, or an
    /// invalid-state error if no check was in progress.
    pub fn finish_check(
        &mut self,
        result: UpdateResult<Option<UpdateInfo>>,
    ) -> UpdateResult<Option<UpdateInfo>> {
        if self.state != UpdateState::Checking {
            return Err(self.invalid("finish_check"));
        }
        match result {
            Ok(Some(info)) => {
                self.available = Some(info.clone());
                self.transition(UpdateState::UpdateAvailable);
                Ok(Some(info))
            }
            Ok(None) => {
                self.transition(UpdateState::Idle);
                Ok(None)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    // ── Download ────────────────────────────────────────────────

    /// Enters `Downloading`.
    ///
    /// # Errors
    ///
    /// Fails unless an update is available.
    pub fn begin_download(&mut self) -> UpdateResult<DownloadTicket> {
        let info = match (&self.state, &self.available) {
            (UpdateState::UpdateAvailable, Some(info)) => info.clone(),
            _ => return Err(self.invalid("download_update")),
        };
        self.generation += 1;
        self.progress = Some(DownloadProgress {
            received: 0,
            total: info.download_size_bytes,
        });
        self.transition(UpdateState::Downloading);
        Ok(DownloadTicket {
            generation: self.generation,
            info,
        })
    }

    /// Returns true while `generation` is the live download.
    #[must_use]
    pub fn is_current_download(&self, generation: u64) -> bool {
        self.state == UpdateState::Downloading && self.generation == generation
    }

    /// Records progress. Returns `None` for a stale download.
    pub fn record_progress(&mut self, generation: u64, received: u64) -> Option<DownloadProgress> {
        if !self.is_current_download(generation) {
            return None;
        }
        let progress = self.progress.get_or_insert(DownloadProgress {
            received: 0,
            total: 0,
        });
        progress.received = received;
        progress.total = progress.total.max(received);
        Some(*progress)
    }

    /// Applies a download result. Returns false for a stale download.
    pub fn finish_download(&mut self, generation: u64, result: UpdateResult<PathBuf>) -> bool {
        if !self.is_current_download(generation) {
            return false;
        }
        match result {
            Ok(path) => {
                self.package = Some(path);
                self.transition(UpdateState::Downloaded);
            }
            Err(e) => self.fail(&e),
        }
        true
    }

    /// Cancels an in-flight download, returning to `Idle`.
    ///
    /// A no-op in any other state. Returns true if a download was cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.state != UpdateState::Downloading {
            return false;
        }
        self.generation += 1;
        self.progress = None;
        self.available = None;
        self.transition(UpdateState::Idle);
        true
    }

    // ── Install ─────────────────────────────────────────────────

    /// Enters `Installing` and returns the package to launch.
    ///
    /// # Errors
    ///
    /// Fails unless a package has been downloaded.
    pub fn begin_install(&mut self) -> UpdateResult<PathBuf> {
        let package = match (&self.state, &self.package) {
            (UpdateState::Downloaded, Some(package)) => package.clone(),
            _ => return Err(self.invalid("quit_and_install")),
        };
        self.transition(UpdateState::Installing);
        Ok(package)
    }

    /// Applies the installer's answer.
    ///
    /// On acceptance the machine stays in `Installing` and the caller is
    /// expected to exit. A rejection returns to `Downloaded` so the install
    /// can be retried. A launch failure enters `Failed`.
    pub fn finish_install(&mut self, outcome: InstallOutcome) -> QuitAndInstallResult {
        if self.state != UpdateState::Installing {
            return QuitAndInstallResult::Rejected {
                reason: self.invalid("finish_install").to_string(),
            };
        }
        match outcome {
            InstallOutcome::Launched => {
                let package = self.package.clone().unwrap_or_default();
                QuitAndInstallResult::Accepted { package }
            }
            InstallOutcome::Refused(reason) => {
                self.transition(UpdateState::Downloaded);
                QuitAndInstallResult::Rejected { reason }
            }
            InstallOutcome::Failed(error) => {
                self.fail(&UpdateError::Io(error.clone()));
                QuitAndInstallResult::Failed { error }
            }
        }
    }

    /// Returns the notice the installed update should leave behind.
    #[must_use]
    pub fn pending_post_update_notice(&self) -> Option<PostUpdateNotice> {
        self.available.as_ref().and_then(UpdateInfo::post_update_notice)
    }

    // ── Post-update notice ──────────────────────────────────────

    /// Loads a notice left by a previous install.
    pub fn set_post_update_notice(&mut self, notice: Option<PostUpdateNotice>) {
        self.notice = notice;
    }

    /// Returns the unacknowledged notice, if any.
    #[must_use]
    pub fn post_update_info(&self) -> Option<&PostUpdateNotice> {
        self.notice.as_ref().filter(|n| !n.acknowledged)
    }

    /// Acknowledges the notice. Idempotent.
    ///
    /// Returns true if this call changed the notice.
    pub fn ack_post_update_info(&mut self) -> bool {
        match self.notice.as_mut() {
            Some(notice) if !notice.acknowledged => {
                notice.acknowledged = true;
                true
            }
            _ => false,
        }
    }

    /// Returns the notice including its acknowledgement flag.
    #[must_use]
    pub fn post_update_notice(&self) -> Option<&PostUpdateNotice> {
        self.notice.as_ref()
    }
}
