//! Installer collaborator.

use dm_update::InstallOutcome;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{info, warn};

/// Hands a downloaded package to the platform installer.
pub trait Installer: Send + Sync {
    /// Launches the installer for `package` with `args`.
    ///
    /// Returning [`InstallOutcome::Launched`] tells the host to exit.
    fn launch_and_exit(&self, package: &Path, args: &[String]) -> InstallOutcome;
}

/// Runs the package itself as the installer process.
///
/// The child is detached from the host's standard streams so it survives
/// the host exiting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessInstaller;

impl Installer for ProcessInstaller {
    fn launch_and_exit(&self, package: &Path, args: &[String]) -> InstallOutcome {
        if !package.is_file() {
            return InstallOutcome::Refused(format!(
                "package {} does not exist",
                package.display()
            ));
        }
        match Command::new(package)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                info!("Installer launched for {} (pid {})", package.display(), child.id());
                InstallOutcome::Launched
            }
            Err(e) => {
                warn!("Failed to launch installer {}: {}", package.display(), e);
                InstallOutcome::Failed(e.to_string())
            }
        }
    }
}
