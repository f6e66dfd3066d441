//! Update lifecycle for the DistroMate client.
//!
//! A pure state machine covering update checks, package downloads with
//! cancellation, hand-off to the installer and the post-update notice
//! handshake. `dm-client` drives it and performs the actual I/O.

mod error;
mod info;
mod install;
mod machine;
mod state;

pub use error::{UpdateError, UpdateResult};
pub use info::{PostUpdateNotice, UpdateInfo};
pub use install::{InstallOutcome, QuitAndInstallResult};
pub use machine::{DownloadProgress, DownloadTicket, UpdateMachine, UpdateSnapshot};
pub use state::UpdateState;
