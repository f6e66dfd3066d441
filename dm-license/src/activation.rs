//! Activation state machine.
//!
//! The machine is a pure engine: it never performs I/O and never reads the
//! clock. The orchestrator asks it for a request, performs the network call
//! with no lock held, then feeds the outcome back. Every `begin_*` call
//! returns an attempt number and a completion for any other attempt is
//! discarded, so a response that arrives after `reset` cannot resurrect the
//! activation.
//!
//! ```text
//! Unconfigured ──set_license_key──▶ KeySet ──begin_activation──▶ Activating
//!      ▲                              ▲                              │
//!      │ reset (from any state)       └────────── failure ───────────┤
//!      │                                                             ▼
//! Deactivated ◀── revoked / unknown ── Validating ◀──────────────▶ Activated
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codes::ActivationErrorCode;
use crate::config::ConfigStore;
use crate::error::{LicenseError, LicenseResult};
use crate::error_state::{ErrorCategory, ErrorState};
use crate::key::LicenseKey;
use crate::records::{ActivationModes, LicenseGrant, LicenseMetadata};

/// Lifecycle state of the local activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivationState {
    /// No license key yet.
    Unconfigured,
    /// Key entered, not yet activated.
    KeySet,
    /// Activation request in flight.
    Activating,
    /// Activated on this device.
    Activated,
    /// Validation request in flight.
    Validating,
    /// The server revoked or forgot the activation.
    Deactivated,
}

impl ActivationState {
    /// Returns true when activation records are available.
    #[must_use]
    pub fn is_activated(self) -> bool {
        matches!(self, Self::Activated | Self::Validating)
    }
}

impl fmt::Display for ActivationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconfigured => "Unconfigured",
            Self::KeySet => "KeySet",
            Self::Activating => "Activating",
            Self::Activated => "Activated",
            Self::Validating => "Validating",
            Self::Deactivated => "Deactivated",
        };
        f.write_str(name)
    }
}

/// Tuning for genuine checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenuinePolicy {
    /// How long a server-confirmed result is reused without a round-trip.
    pub cache_ttl: Duration,
    /// Grace window used when the server does not set one.
    pub default_grace: Duration,
    /// Allowed backwards clock skew before reporting tampering.
    pub clock_tolerance: Duration,
}

impl Default for GenuinePolicy {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::seconds(60),
            default_grace: Duration::days(7),
            clock_tolerance: Duration::minutes(5),
        }
    }
}

/// Per-request values supplied by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Fingerprint computed for this device. A configured override wins.
    pub fingerprint: String,
    /// Fresh nonce the response signature must cover.
    pub nonce: String,
    /// Version of the calling application.
    pub client_version: String,
}

/// Body of an activation or validation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Product id.
    pub product_id: String,
    /// Opaque product descriptor.
    pub product_data: String,
    /// Feature flags.
    pub flags: u32,
    /// License key.
    pub license_key: LicenseKey,
    /// Device fingerprint.
    pub fingerprint: String,
    /// Request nonce.
    pub nonce: String,
    /// Calling application version.
    pub client_version: String,
    /// Present on validation requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_id: Option<String>,
}

/// A request the orchestrator must send, tagged with its attempt number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationRequest {
    /// Attempt number to pass back on completion.
    pub attempt: u64,
    /// Request body.
    pub payload: RequestPayload,
}

/// What `begin_validation` decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationStart {
    /// Answered locally, no request needed.
    Decided(bool),
    /// A server round-trip is required.
    Remote(ActivationRequest),
}

/// Result of a validation round-trip.
#[derive(Debug)]
pub enum ValidationResponse {
    /// Server confirmed the activation.
    Confirmed(LicenseGrant),
    /// Server answered with a rejection.
    Rejected(LicenseError),
    /// No usable answer.
    Unreachable(LicenseError),
}

/// Persistable activation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseSnapshot {
    /// Product the activation belongs to.
    pub product_id: String,
    /// Cached records.
    pub metadata: LicenseMetadata,
}

#[derive(Debug, Clone, Copy)]
struct GenuineCheck {
    checked_at: DateTime<Utc>,
    genuine: bool,
}

/// The activation engine.
#[derive(Debug)]
pub struct ActivationMachine {
    state: ActivationState,
    resume_state: ActivationState,
    attempt: u64,
    config: ConfigStore,
    key: Option<LicenseKey>,
    metadata: Option<LicenseMetadata>,
    errors: ErrorState,
    policy: GenuinePolicy,
    last_check: Option<GenuineCheck>,
}

impl Default for ActivationMachine {
    fn default() -> Self {
        Self::new(GenuinePolicy::default())
    }
}

impl ActivationMachine {
    /// Creates an unconfigured machine.
    #[must_use]
    pub fn new(policy: GenuinePolicy) -> Self {
        Self {
            state: ActivationState::Unconfigured,
            resume_state: ActivationState::Unconfigured,
            attempt: 0,
            config: ConfigStore::new(),
            key: None,
            metadata: None,
            errors: ErrorState::new(),
            policy,
            last_check: None,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ActivationState {
        self.state
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Returns the genuine-check policy.
    #[must_use]
    pub fn policy(&self) -> &GenuinePolicy {
        &self.policy
    }

    /// Returns the error slots.
    #[must_use]
    pub fn errors(&self) -> &ErrorState {
        &self.errors
    }

    /// Returns the error slots for recording failures outside this machine.
    pub fn errors_mut(&mut self) -> &mut ErrorState {
        &mut self.errors
    }

    // ── Configuration ───────────────────────────────────────────

    fn track(&mut self, category: ErrorCategory, result: LicenseResult<()>) -> LicenseResult<()> {
        match &result {
            Ok(()) => self.errors.clear_category(category),
            Err(e) => self.errors.record_error(category, e),
        }
        result
    }

    /// See [`ConfigStore::set_product_data`].
    ///
    /// # Errors
    ///
    /// Fails once activation has started.
    pub fn set_product_data(&mut self, data: impl Into<String>) -> LicenseResult<()> {
        let result = self.config.set_product_data(data);
        self.track(ErrorCategory::Configuration, result)
    }

    /// See [`ConfigStore::set_product_id`].
    ///
    /// # Errors
    ///
    /// Fails once activation has started or when `id` is blank.
    pub fn set_product_id(&mut self, id: impl AsRef<str>, flags: u32) -> LicenseResult<()> {
        let result = self.config.set_product_id(id, flags);
        self.track(ErrorCategory::Configuration, result)
    }

    /// See [`ConfigStore::set_data_directory`].
    ///
    /// # Errors
    ///
    /// Fails once activation has started or when the path is empty.
    pub fn set_data_directory(&mut self, path: impl Into<std::path::PathBuf>) -> LicenseResult<()> {
        let result = self.config.set_data_directory(path);
        self.track(ErrorCategory::Configuration, result)
    }

    /// See [`ConfigStore::set_debug_mode`].
    ///
    /// # Errors
    ///
    /// Fails once activation has started.
    pub fn set_debug_mode(&mut self, enabled: bool) -> LicenseResult<()> {
        let result = self.config.set_debug_mode(enabled);
        self.track(ErrorCategory::Configuration, result)
    }

    /// See [`ConfigStore::set_custom_fingerprint`].
    ///
    /// # Errors
    ///
    /// Fails once activation has started.
    pub fn set_custom_fingerprint(&mut self, fingerprint: impl AsRef<str>) -> LicenseResult<()> {
        let result = self.config.set_custom_fingerprint(fingerprint);
        self.track(ErrorCategory::Configuration, result)
    }

    /// Seeds configuration defaults. Explicit setters still win.
    pub fn apply_defaults(&mut self, product_id: Option<&str>, data_directory: Option<&std::path::Path>) {
        self.config.apply_defaults(product_id, data_directory);
    }

    /// Stores the license key and moves to `KeySet`.
    ///
    /// # Errors
    ///
    /// Fails when the key is blank or an activation exists or is in flight.
    pub fn set_license_key(&mut self, raw: impl AsRef<str>) -> LicenseResult<()> {
        let result = match self.state {
            ActivationState::Unconfigured
            | ActivationState::KeySet
            | ActivationState::Deactivated => LicenseKey::new(raw).map(|key| {
                self.key = Some(key);
                self.state = ActivationState::KeySet;
            }),
            state => Err(LicenseError::InvalidState {
                operation: "set_license_key",
                state,
            }),
        };
        self.track(ErrorCategory::Configuration, result)
    }

    /// Returns the entered license key.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] before a key is set.
    pub fn license_key(&self) -> LicenseResult<&LicenseKey> {
        self.key.as_ref().ok_or(LicenseError::NotActivated)
    }

    // ── Activation ──────────────────────────────────────────────

    fn build_request(
        &mut self,
        ctx: RequestContext,
        activation_id: Option<String>,
    ) -> LicenseResult<ActivationRequest> {
        let identity = self.config.identity()?.clone();
        let license_key = self.key.clone().ok_or(LicenseError::InvalidState {
            operation: "activate_license",
            state: self.state,
        })?;
        let fingerprint = self
            .config
            .config()
            .custom_fingerprint
            .clone()
            .unwrap_or(ctx.fingerprint);

        self.attempt += 1;
        Ok(ActivationRequest {
            attempt: self.attempt,
            payload: RequestPayload {
                product_id: identity.product_id,
                product_data: identity.product_data,
                flags: identity.flags,
                license_key,
                fingerprint,
                nonce: ctx.nonce,
                client_version: ctx.client_version,
                activation_id,
            },
        })
    }

    /// Starts an activation and locks the configuration.
    ///
    /// Allowed from `KeySet`, and from `Activated` for re-activation.
    ///
    /// # Errors
    ///
    /// Fails without side effects on the state when called out of order or
    /// without a product id. The failure is recorded in `lastError`.
    pub fn begin_activation(&mut self, ctx: RequestContext) -> LicenseResult<ActivationRequest> {
        let result = match self.state {
            ActivationState::KeySet | ActivationState::Activated => self.build_request(ctx, None),
            state => Err(LicenseError::InvalidState {
                operation: "activate_license",
                state,
            }),
        };

        match result {
            Ok(request) => {
                self.config.lock();
                self.resume_state = self.state;
                self.state = ActivationState::Activating;
                Ok(request)
            }
            Err(e) => {
                self.errors.record_activation_failure(&e);
                Err(e)
            }
        }
    }

    fn check_grant(&self, grant: &LicenseGrant, now: DateTime<Utc>) -> LicenseResult<()> {
        if grant.revoked {
            return Err(LicenseError::Revoked);
        }
        if grant.suspended {
            return Err(LicenseError::Suspended);
        }
        if let Some(expiry) = grant.expiry_date
            && expiry <= now
        {
            return Err(LicenseError::Expired(expiry));
        }
        if let Some(synced) = grant.last_synced_date
            && now + self.policy.clock_tolerance < synced
        {
            return Err(LicenseError::ClockTampering {
                last_synced: synced,
            });
        }
        Ok(())
    }

    /// Applies the outcome of an activation request.
    ///
    /// Returns true if the device is now activated. A stale attempt is
    /// discarded and returns false without touching any state.
    pub fn complete_activation(
        &mut self,
        attempt: u64,
        outcome: LicenseResult<LicenseGrant>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.state != ActivationState::Activating || attempt != self.attempt {
            return false;
        }

        let checked = outcome.and_then(|grant| self.check_grant(&grant, now).map(|()| grant));
        match checked {
            Ok(grant) => {
                self.key = Some(grant.license_key.clone());
                self.metadata = Some(LicenseMetadata::from_grant(
                    &grant,
                    now,
                    self.policy.default_grace,
                ));
                self.state = ActivationState::Activated;
                self.last_check = Some(GenuineCheck {
                    checked_at: now,
                    genuine: true,
                });
                self.errors.clear_category(ErrorCategory::Activation);
                true
            }
            Err(e) => {
                self.errors.record_activation_failure(&e);
                self.state = self.resume_state;
                false
            }
        }
    }

    // ── Validation ──────────────────────────────────────────────

    /// Checks the cached records without a server round-trip.
    ///
    /// # Errors
    ///
    /// Returns the reason the cached license cannot be trusted at `now`.
    pub fn local_verdict(&self, now: DateTime<Utc>) -> LicenseResult<()> {
        let meta = self.active_metadata()?;
        if meta.clock_rolled_back(now, self.policy.clock_tolerance) {
            return Err(LicenseError::ClockTampering {
                last_synced: meta.activation.last_synced_date,
            });
        }
        if !meta.within_grace(now) {
            return Err(LicenseError::GracePeriodExpired {
                expired_at: Some(meta.activation.server_sync_grace_period_expiry),
            });
        }
        Self::check_record(meta, now)
    }

    fn check_record(meta: &LicenseMetadata, now: DateTime<Utc>) -> LicenseResult<()> {
        if meta.license.revoked {
            return Err(LicenseError::Revoked);
        }
        if meta.license.suspended {
            return Err(LicenseError::Suspended);
        }
        if let Some(expiry) = meta.license.expiry_date
            && meta.license.is_expired(now)
        {
            return Err(LicenseError::Expired(expiry));
        }
        Ok(())
    }

    fn fail_validation(&mut self, err: &LicenseError) -> bool {
        self.errors.record_error(ErrorCategory::Validation, err);
        false
    }

    /// Starts a genuine check.
    ///
    /// A fresh cached confirmation inside the grace window answers
    /// immediately. A check already in flight answers from the cached
    /// records, so concurrent callers never stack requests.
    pub fn begin_validation(&mut self, ctx: RequestContext, now: DateTime<Utc>) -> ValidationStart {
        match self.state {
            ActivationState::Validating | ActivationState::Activating if self.has_records() => {
                return ValidationStart::Decided(self.local_verdict(now).is_ok());
            }
            ActivationState::Activated => {}
            _ => return ValidationStart::Decided(self.fail_validation(&LicenseError::NotActivated)),
        }

        if let Err(e @ LicenseError::ClockTampering { .. }) = self.local_verdict(now) {
            self.last_check = None;
            return ValidationStart::Decided(self.fail_validation(&e));
        }

        if let Some(check) = self.last_check
            && check.checked_at <= now
            && now - check.checked_at < self.policy.cache_ttl
            && self.metadata.as_ref().is_some_and(|m| m.within_grace(now))
        {
            return ValidationStart::Decided(check.genuine);
        }

        let activation_id = self
            .metadata
            .as_ref()
            .map(|m| m.activation.activation_id.clone());
        match self.build_request(ctx, activation_id) {
            Ok(request) => {
                self.state = ActivationState::Validating;
                ValidationStart::Remote(request)
            }
            Err(e) => ValidationStart::Decided(self.fail_validation(&e)),
        }
    }

    fn deactivate(&mut self) {
        self.metadata = None;
        self.last_check = None;
        self.state = ActivationState::Deactivated;
    }

    fn apply_rejection(&mut self, err: &LicenseError, now: DateTime<Utc>) -> bool {
        match err.code() {
            Some(ActivationErrorCode::LicenseRevoked | ActivationErrorCode::UnknownLicense) => {
                self.deactivate();
            }
            Some(ActivationErrorCode::LicenseSuspended) => {
                if let Some(meta) = self.metadata.as_mut() {
                    meta.license.suspended = true;
                }
            }
            _ => {}
        }
        if self.state != ActivationState::Deactivated {
            self.last_check = Some(GenuineCheck {
                checked_at: now,
                genuine: false,
            });
        }
        self.fail_validation(err)
    }

    fn fall_back(&mut self, now: DateTime<Utc>) -> bool {
        match self.local_verdict(now) {
            Ok(()) => true,
            Err(e) => self.fail_validation(&e),
        }
    }

    /// Applies the outcome of a validation request.
    ///
    /// Transport failures and unusable responses are absorbed while the
    /// grace window is open. Server errors that are not business decisions
    /// (rate limiting, 5xx) are treated the same way. A stale attempt
    /// returns false without touching any state.
    pub fn complete_validation(
        &mut self,
        attempt: u64,
        response: ValidationResponse,
        now: DateTime<Utc>,
    ) -> bool {
        if self.state != ActivationState::Validating || attempt != self.attempt {
            return false;
        }
        self.state = ActivationState::Activated;

        match response {
            ValidationResponse::Confirmed(grant) => match self.check_grant(&grant, now) {
                Ok(()) => {
                    let default_grace = self.policy.default_grace;
                    match self.metadata.as_mut() {
                        Some(meta) => meta.refresh(&grant, now, default_grace),
                        None => {
                            self.metadata =
                                Some(LicenseMetadata::from_grant(&grant, now, default_grace));
                        }
                    }
                    self.last_check = Some(GenuineCheck {
                        checked_at: now,
                        genuine: true,
                    });
                    self.errors.clear_category(ErrorCategory::Validation);
                    true
                }
                Err(e) => self.apply_rejection(&e, now),
            },
            ValidationResponse::Rejected(e) => {
                if e.code().is_some_and(ActivationErrorCode::is_server_rejection) {
                    self.apply_rejection(&e, now)
                } else {
                    self.fall_back(now)
                }
            }
            ValidationResponse::Unreachable(_) => self.fall_back(now),
        }
    }

    /// Checks expiry and revocation against the cached records only.
    ///
    /// Never needs the network and ignores the sync grace window.
    pub fn is_license_valid(&mut self, now: DateTime<Utc>) -> bool {
        let verdict = self.active_metadata().and_then(|meta| {
            if meta.clock_rolled_back(now, self.policy.clock_tolerance) {
                return Err(LicenseError::ClockTampering {
                    last_synced: meta.activation.last_synced_date,
                });
            }
            Self::check_record(meta, now)
        });
        match verdict {
            Ok(()) => {
                self.errors.clear_category(ErrorCategory::Validation);
                true
            }
            Err(e) => self.fail_validation(&e),
        }
    }

    // ── Teardown and persistence ────────────────────────────────

    /// Clears all local activation state and unlocks configuration.
    ///
    /// Configured values are kept. Any request in flight is orphaned.
    pub fn reset(&mut self) {
        self.state = ActivationState::Unconfigured;
        self.resume_state = ActivationState::Unconfigured;
        self.attempt += 1;
        self.key = None;
        self.metadata = None;
        self.last_check = None;
        self.errors.clear();
        self.config.unlock();
    }

    /// Returns the persistable state while activated.
    #[must_use]
    pub fn snapshot(&self) -> Option<LicenseSnapshot> {
        let meta = self.active_metadata().ok()?;
        let identity = self.config.identity().ok()?;
        Some(LicenseSnapshot {
            product_id: identity.product_id.clone(),
            metadata: meta.clone(),
        })
    }

    /// Re-enters `Activated` from a persisted snapshot.
    ///
    /// # Errors
    ///
    /// Fails if an activation exists or is in flight, the product id
    /// differs from the configured one, or a different key was entered.
    pub fn restore(&mut self, snapshot: LicenseSnapshot) -> LicenseResult<()> {
        let result = self.check_restore(&snapshot);
        if let Err(e) = &result {
            self.errors.record_error(ErrorCategory::Activation, e);
            return result;
        }

        self.key = Some(snapshot.metadata.license.license_key.clone());
        self.metadata = Some(snapshot.metadata);
        self.last_check = None;
        self.config.lock();
        self.state = ActivationState::Activated;
        Ok(())
    }

    fn check_restore(&self, snapshot: &LicenseSnapshot) -> LicenseResult<()> {
        if !matches!(
            self.state,
            ActivationState::Unconfigured | ActivationState::KeySet
        ) {
            return Err(LicenseError::InvalidState {
                operation: "restore_activation",
                state: self.state,
            });
        }
        let identity = self.config.identity()?;
        if identity.product_id != snapshot.product_id {
            return Err(LicenseError::InvalidArgument(format!(
                "stored activation belongs to product {}",
                snapshot.product_id
            )));
        }
        if let Some(key) = &self.key
            && key != &snapshot.metadata.license.license_key
        {
            return Err(LicenseError::InvalidArgument(
                "stored activation is for a different license key".to_string(),
            ));
        }
        Ok(())
    }

    // ── Read accessors ──────────────────────────────────────────

    /// True while the cached records describe a live activation. This
    /// includes a re-activation in flight from `Activated`.
    fn has_records(&self) -> bool {
        self.state.is_activated()
            || (self.state == ActivationState::Activating
                && self.resume_state == ActivationState::Activated)
    }

    fn active_metadata(&self) -> LicenseResult<&LicenseMetadata> {
        if !self.has_records() {
            return Err(LicenseError::NotActivated);
        }
        self.metadata.as_ref().ok_or(LicenseError::NotActivated)
    }

    /// Returns the cached records, if activated.
    #[must_use]
    pub fn metadata(&self) -> Option<&LicenseMetadata> {
        self.active_metadata().ok()
    }

    /// Returns the server-issued activation id.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] before activation.
    pub fn activation_id(&self) -> LicenseResult<&str> {
        Ok(&self.active_metadata()?.activation.activation_id)
    }

    /// Returns the initial and current activation modes.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] before activation.
    pub fn activation_mode(&self) -> LicenseResult<ActivationModes> {
        Ok(self.active_metadata()?.license.activation_mode)
    }

    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] before activation.
    pub fn activation_creation_date(&self) -> LicenseResult<DateTime<Utc>> {
        Ok(self.active_metadata()?.activation.creation_date)
    }

    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] before activation.
    pub fn activation_last_synced_date(&self) -> LicenseResult<DateTime<Utc>> {
        Ok(self.active_metadata()?.activation.last_synced_date)
    }

    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] before activation.
    pub fn license_activation_date(&self) -> LicenseResult<DateTime<Utc>> {
        Ok(self.active_metadata()?.activation.activation_date)
    }

    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] before activation.
    pub fn license_creation_date(&self) -> LicenseResult<DateTime<Utc>> {
        Ok(self.active_metadata()?.license.creation_date)
    }

    /// Returns the expiry date, or `None` for perpetual licenses.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] before activation.
    pub fn license_expiry_date(&self) -> LicenseResult<Option<DateTime<Utc>>> {
        Ok(self.active_metadata()?.license.expiry_date)
    }

    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] before activation.
    pub fn server_sync_grace_period_expiry_date(&self) -> LicenseResult<DateTime<Utc>> {
        Ok(self.active_metadata()?.activation.server_sync_grace_period_expiry)
    }
}
