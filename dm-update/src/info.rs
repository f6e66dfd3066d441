//! Update descriptors parsed from update-service responses.

use dm_envelope::{Envelope, EnvelopeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{UpdateError, UpdateResult};

/// A notice that must be acknowledged once after an update installs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostUpdateNotice {
    /// Version the notice belongs to.
    pub version: String,
    /// Structured payload from the update envelope.
    pub info: Value,
    /// Set once the application has acknowledged the notice.
    #[serde(default)]
    pub acknowledged: bool,
}

/// An available update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    /// Version string of the update.
    pub version: String,
    /// Release notes.
    pub release_notes: String,
    /// Package size in bytes.
    #[serde(rename = "sizeBytes")]
    pub download_size_bytes: u64,
    /// Payload to surface after install.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_update_info: Option<Value>,
    /// Package location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Hex SHA-256 of the package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

const REQUIRED_FIELDS: [&str; 3] = ["version", "releaseNotes", "sizeBytes"];

impl UpdateInfo {
    /// Interprets an update-service response.
    ///
    /// Returns `Ok(None)` for "no update": status 204, an empty body, or
    /// `"updateAvailable": false`.
    ///
    /// # Errors
    ///
    /// Non-2xx statuses map to [`UpdateError::ServiceError`]; malformed
    /// bodies map to [`UpdateError::Envelope`].
    pub fn from_response(status: u16, body: &[u8]) -> UpdateResult<Option<Self>> {
        if !(200..300).contains(&status) {
            return Err(UpdateError::ServiceError {
                status,
                message: String::from_utf8_lossy(body).trim().to_string(),
            });
        }
        if status == 204 || body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let envelope = Envelope::parse(body)?;
        if envelope.get("updateAvailable").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        Self::from_envelope(&envelope).map(Some)
    }

    /// Decodes an update from an envelope.
    ///
    /// # Errors
    ///
    /// Fails when required fields are missing or malformed.
    pub fn from_envelope(envelope: &Envelope) -> UpdateResult<Self> {
        envelope.require(&REQUIRED_FIELDS)?;
        let info: Self = envelope.decode()?;
        if info.version.trim().is_empty() {
            return Err(EnvelopeError::InvalidField("version is empty".to_string()).into());
        }
        if let Some(post) = &info.post_update_info
            && !post.is_object()
        {
            return Err(
                EnvelopeError::InvalidField("postUpdateInfo must be an object".to_string()).into(),
            );
        }
        Ok(info)
    }

    /// Returns the notice to persist when this update installs.
    #[must_use]
    pub fn post_update_notice(&self) -> Option<PostUpdateNotice> {
        self.post_update_info.clone().map(|info| PostUpdateNotice {
            version: self.version.clone(),
            info,
            acknowledged: false,
        })
    }
}
