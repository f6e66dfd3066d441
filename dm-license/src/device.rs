//! Device fingerprinting for license binding.
//!
//! The activation request carries a fingerprint so the licensing authority
//! can bind an activation slot to one machine. The default provider hashes
//! stable host identifiers. Applications can override the result with
//! `set_custom_fingerprint`.

use sha2::{Digest, Sha256};
use std::env;

/// Computes the fingerprint sent with activation and validation requests.
pub trait FingerprintProvider: Send + Sync {
    /// Returns a fingerprint that is deterministic for this device.
    fn compute(&self) -> String;
}

/// Fingerprint derived from OS, architecture, hostname and machine id.
///
/// The hash is salted with a namespace so the same host yields unrelated
/// fingerprints for different vendors.
#[derive(Debug, Clone, Default)]
pub struct HardwareFingerprint {
    namespace: String,
}

impl HardwareFingerprint {
    /// Creates a provider salted with `namespace` (usually the product id).
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn components(&self) -> Vec<String> {
        let mut ids = vec![
            self.namespace.clone(),
            env::consts::OS.to_string(),
            env::consts::ARCH.to_string(),
            host_name(),
        ];
        if let Some(machine_id) = machine_id() {
            ids.push(machine_id);
        }
        ids
    }
}

impl FingerprintProvider for HardwareFingerprint {
    fn compute(&self) -> String {
        let digest = Sha256::digest(self.components().join("|").as_bytes());
        hex::encode(&digest[..16])
    }
}

/// A fixed fingerprint, used for overrides and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFingerprint(pub String);

impl FingerprintProvider for StaticFingerprint {
    fn compute(&self) -> String {
        self.0.clone()
    }
}

fn host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn machine_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        ["/etc/machine-id", "/var/lib/dbus/machine-id"]
            .iter()
            .find_map(|p| std::fs::read_to_string(p).ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ioreg")
            .args(["-rd1", "-c", "IOPlatformExpertDevice"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|output| {
                output
                    .lines()
                    .find(|l| l.contains("IOPlatformUUID"))
                    .and_then(|l| l.split('"').nth(3))
                    .map(String::from)
            })
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}
