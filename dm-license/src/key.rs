//! License keys.
//!
//! Keys are opaque to the client. The licensing authority decides what a
//! valid key looks like, so the only local checks are trimming and
//! rejecting empty input.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LicenseError, LicenseResult};

/// An opaque license key supplied by the user.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LicenseKey(String);

impl LicenseKey {
    /// Creates a key from user input.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::InvalidArgument`] if the key is blank.
    pub fn new(raw: impl AsRef<str>) -> LicenseResult<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(LicenseError::InvalidArgument(
                "license key must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the key as sent to the server.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a form safe for logs: the last four characters only.
    #[must_use]
    pub fn redacted(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        format!("****{tail}")
    }
}

impl TryFrom<String> for LicenseKey {
    type Error = LicenseError;

    fn try_from(value: String) -> LicenseResult<Self> {
        Self::new(value)
    }
}

impl From<LicenseKey> for String {
    fn from(key: LicenseKey) -> Self {
        key.0
    }
}

impl fmt::Debug for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LicenseKey").field(&self.redacted()).finish()
    }
}

impl fmt::Display for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}
