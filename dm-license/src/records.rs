//! Activation and license records, and the metadata cache built from them.
//!
//! A [`LicenseGrant`] is what the server says in one successful response.
//! [`LicenseMetadata`] is what the client keeps: it is created from the
//! first grant and refreshed by each later one.

use chrono::{DateTime, Duration, Utc};
use dm_envelope::{Envelope, EnvelopeError};
use serde::{Deserialize, Serialize};

use crate::error::LicenseResult;
use crate::key::LicenseKey;

/// How a license was activated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// Activated against the server.
    #[default]
    Online,
    /// Activated from an offline response file.
    Offline,
    /// Online activation that must resync within the grace period.
    ServerSync,
    /// Time-limited trial.
    Trial,
}

impl ActivationMode {
    /// Parses the mode names the server sends. Unknown names yield `None`.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        let folded: String = name
            .chars()
            .filter(|c| !matches!(c, '_' | '-'))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match folded.as_str() {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "serversync" | "sync" => Some(Self::ServerSync),
            "trial" => Some(Self::Trial),
            _ => None,
        }
    }
}

/// The activation mode at activation time and as of the last sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationModes {
    /// Mode when the activation was created.
    pub initial: ActivationMode,
    /// Mode reported by the most recent sync.
    pub current: ActivationMode,
}

/// The device's activation slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRecord {
    /// Server-issued activation id.
    pub activation_id: String,
    /// When the activation record was created on the server.
    pub creation_date: DateTime<Utc>,
    /// When this device was activated.
    pub activation_date: DateTime<Utc>,
    /// Last successful server confirmation.
    pub last_synced_date: DateTime<Utc>,
    /// End of the offline grace window.
    pub server_sync_grace_period_expiry: DateTime<Utc>,
}

/// License attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRecord {
    /// The activated key.
    pub license_key: LicenseKey,
    /// Expiry, if the license is time-limited.
    pub expiry_date: Option<DateTime<Utc>>,
    /// When the license was issued.
    pub creation_date: DateTime<Utc>,
    /// Initial and current activation mode.
    pub activation_mode: ActivationModes,
    /// Revoked by the vendor.
    #[serde(default)]
    pub revoked: bool,
    /// Temporarily suspended.
    #[serde(default)]
    pub suspended: bool,
}

impl LicenseRecord {
    /// Returns true if the license has passed its expiry date at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry <= now)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireLicense {
    key: String,
    creation_date: i64,
    activation_date: i64,
    expiry_date: Option<i64>,
    #[serde(default)]
    revoked: bool,
    #[serde(default)]
    suspended: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGrant {
    activation_id: String,
    license: WireLicense,
    activation_mode: Option<String>,
    creation_date: Option<i64>,
    last_synced_date: Option<i64>,
    server_sync_grace_period_expiry: Option<i64>,
}

/// The contents of one successful activation or validation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseGrant {
    /// Server-issued activation id.
    pub activation_id: String,
    /// Key as confirmed by the server.
    pub license_key: LicenseKey,
    /// License issue date.
    pub license_creation_date: DateTime<Utc>,
    /// Device activation date.
    pub activation_date: DateTime<Utc>,
    /// License expiry.
    pub expiry_date: Option<DateTime<Utc>>,
    /// Revocation flag.
    pub revoked: bool,
    /// Suspension flag.
    pub suspended: bool,
    /// Activation mode, if reported.
    pub activation_mode: Option<ActivationMode>,
    /// Activation record creation date, if reported.
    pub record_creation_date: Option<DateTime<Utc>>,
    /// Server sync time, if reported.
    pub last_synced_date: Option<DateTime<Utc>>,
    /// Grace window end, if the server sets one.
    pub server_sync_grace_period_expiry: Option<DateTime<Utc>>,
}

fn timestamp(field: &str, secs: i64) -> Result<DateTime<Utc>, EnvelopeError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| EnvelopeError::InvalidField(format!("{field}: timestamp out of range")))
}

fn optional_timestamp(field: &str, secs: Option<i64>) -> Result<Option<DateTime<Utc>>, EnvelopeError> {
    secs.map(|s| timestamp(field, s)).transpose()
}

impl LicenseGrant {
    /// Extracts a grant from a success envelope.
    ///
    /// # Errors
    ///
    /// Fails with an envelope error when required fields are missing or
    /// malformed.
    pub fn from_envelope(envelope: &Envelope) -> LicenseResult<Self> {
        envelope.require(&["activationId", "license"])?;
        let wire: WireGrant = envelope.decode()?;

        if wire.activation_id.trim().is_empty() {
            return Err(EnvelopeError::InvalidField("activationId is empty".to_string()).into());
        }
        let license_key = LicenseKey::new(&wire.license.key)
            .map_err(|_| EnvelopeError::InvalidField("license.key is empty".to_string()))?;

        Ok(Self {
            activation_id: wire.activation_id,
            license_key,
            license_creation_date: timestamp("license.creationDate", wire.license.creation_date)?,
            activation_date: timestamp("license.activationDate", wire.license.activation_date)?,
            expiry_date: optional_timestamp("license.expiryDate", wire.license.expiry_date)?,
            revoked: wire.license.revoked,
            suspended: wire.license.suspended,
            activation_mode: wire
                .activation_mode
                .as_deref()
                .and_then(ActivationMode::from_wire),
            record_creation_date: optional_timestamp("creationDate", wire.creation_date)?,
            last_synced_date: optional_timestamp("lastSyncedDate", wire.last_synced_date)?,
            server_sync_grace_period_expiry: optional_timestamp(
                "serverSyncGracePeriodExpiry",
                wire.server_sync_grace_period_expiry,
            )?,
        })
    }

    fn synced_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.last_synced_date.unwrap_or(now)
    }

    fn grace_expiry(&self, now: DateTime<Utc>, default_grace: Duration) -> DateTime<Utc> {
        self.server_sync_grace_period_expiry
            .unwrap_or_else(|| self.synced_at(now) + default_grace)
    }
}

/// Cached activation and license records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseMetadata {
    /// Activation slot.
    pub activation: ActivationRecord,
    /// License attributes.
    pub license: LicenseRecord,
}

impl LicenseMetadata {
    /// Builds the cache from the first grant of an activation.
    ///
    /// Without a server-supplied grace expiry the window runs for
    /// `default_grace` from the sync time.
    #[must_use]
    pub fn from_grant(grant: &LicenseGrant, now: DateTime<Utc>, default_grace: Duration) -> Self {
        let mode = grant.activation_mode.unwrap_or_default();
        Self {
            activation: ActivationRecord {
                activation_id: grant.activation_id.clone(),
                creation_date: grant.record_creation_date.unwrap_or(grant.activation_date),
                activation_date: grant.activation_date,
                last_synced_date: grant.synced_at(now),
                server_sync_grace_period_expiry: grant.grace_expiry(now, default_grace),
            },
            license: LicenseRecord {
                license_key: grant.license_key.clone(),
                expiry_date: grant.expiry_date,
                creation_date: grant.license_creation_date,
                activation_mode: ActivationModes {
                    initial: mode,
                    current: mode,
                },
                revoked: grant.revoked,
                suspended: grant.suspended,
            },
        }
    }

    /// Applies a validation grant. The initial activation mode is kept.
    pub fn refresh(&mut self, grant: &LicenseGrant, now: DateTime<Utc>, default_grace: Duration) {
        let initial = self.license.activation_mode.initial;
        *self = Self::from_grant(grant, now, default_grace);
        self.license.activation_mode.initial = initial;
    }

    /// Returns true while `now` is inside the sync grace window.
    #[must_use]
    pub fn within_grace(&self, now: DateTime<Utc>) -> bool {
        now < self.activation.server_sync_grace_period_expiry
    }

    /// Returns true if `now` is earlier than the last sync by more than
    /// `tolerance`.
    #[must_use]
    pub fn clock_rolled_back(&self, now: DateTime<Utc>, tolerance: Duration) -> bool {
        now + tolerance < self.activation.last_synced_date
    }
}
