//! The license and update client.
//!
//! [`LicenseClient`] drives the activation and update engines. All session
//! state sits behind one mutex. Network calls run with the mutex released:
//! each operation asks an engine for a request under the lock, performs the
//! round-trip unlocked, then applies the outcome under the lock again. The
//! engines discard completions for superseded attempts, so `reset` or
//! `cancel_update_download` always win against a late response.
//!
//! Callbacks are cloned out of their slots and invoked with no lock held.

use dm_envelope::{AuthorityVerifier, Envelope, EnvelopeError, SignatureVerifier, encode_canonical};
use dm_license::{
    ActivationErrorCode, ActivationFailure, ActivationMachine, ActivationModes, ActivationRequest,
    ActivationState, Clock, ErrorCategory, ErrorDetail, ErrorKind, FingerprintProvider,
    HardwareFingerprint, LicenseError, LicenseGrant, LicenseMetadata, LicenseResult,
    LicenseSnapshot, RequestContext, RequestPayload, SystemClock, ValidationResponse,
    ValidationStart,
};
use dm_update::{
    DownloadTicket, PostUpdateNotice, QuitAndInstallResult, UpdateError, UpdateInfo,
    UpdateMachine, UpdateResult, UpdateSnapshot, UpdateState,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callback::{CallbackSlot, LicenseCallback, LicenseStatus, ProgressCallback};
use crate::env::{ENV_DM_PUBLIC_KEY, EnvConfig, default_data_directory};
use crate::error::{StoreResult, TransportError};
use crate::installer::{Installer, ProcessInstaller};
use crate::options::{ClientOptions, InstallOptions, UpdateOptions};
use crate::store::{FileStore, PersistentStore, StoredState};
use crate::transport::{RequestOptions, Transport, TransportResponse};

/// Returns the version of this library.
#[must_use]
pub fn library_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Re-encodes a JSON document in canonical form.
///
/// # Errors
///
/// Fails when `json` is not a valid document.
pub fn json_to_canonical(json: &str) -> Result<String, EnvelopeError> {
    dm_envelope::to_canonical_string(json)
}

// ── Result types ────────────────────────────────────────────────

/// An update-state transition as seen by waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvent {
    /// State after the transition.
    pub state: UpdateState,
    /// Transition counter. Increases by one per transition.
    pub sequence: u64,
}

impl UpdateEvent {
    fn of(machine: &UpdateMachine) -> Self {
        Self {
            state: machine.state(),
            sequence: machine.sequence(),
        }
    }
}

/// Result of waiting for an update-state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateWait {
    /// A transition happened.
    Changed(UpdateEvent),
    /// The timeout elapsed first. Carries the current state.
    TimedOut(UpdateEvent),
}

impl UpdateWait {
    /// Returns the state carried by the result.
    #[must_use]
    pub fn state(&self) -> UpdateState {
        match self {
            Self::Changed(event) | Self::TimedOut(event) => event.state,
        }
    }

    /// Returns true if a transition was observed.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed(_))
    }
}

/// Result of `check_for_updates`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheck {
    /// A newer version is available.
    Available(UpdateInfo),
    /// The application is up to date.
    UpToDate,
    /// The check failed. The error is also recorded in `lastError`.
    Failed(UpdateError),
}

/// Result of `download_update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The package was downloaded and verified.
    Completed(PathBuf),
    /// The download was cancelled.
    Cancelled,
    /// The download failed. The error is also recorded in `lastError`.
    Failed(UpdateError),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    product_id: Option<String>,
    current_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    activation_id: Option<String>,
    fingerprint: String,
}

// ── Builder ─────────────────────────────────────────────────────

/// Builds a [`LicenseClient`] from its collaborators.
pub struct LicenseClientBuilder {
    transport: Arc<dyn Transport>,
    fingerprint: Option<Arc<dyn FingerprintProvider>>,
    store: Option<Arc<dyn PersistentStore>>,
    installer: Arc<dyn Installer>,
    clock: Arc<dyn Clock>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    options: ClientOptions,
    env: Option<EnvConfig>,
}

impl LicenseClientBuilder {
    /// Uses `provider` instead of the hardware fingerprint.
    #[must_use]
    pub fn fingerprint(mut self, provider: Arc<dyn FingerprintProvider>) -> Self {
        self.fingerprint = Some(provider);
        self
    }

    /// Persists to `store` instead of `license.json` in the data directory.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Hands packages to `installer`.
    #[must_use]
    pub fn installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = installer;
        self
    }

    /// Reads time from `clock`.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Verifies response signatures with `verifier`.
    #[must_use]
    pub fn verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Replaces the client options.
    #[must_use]
    pub fn options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses `env` instead of reading the process environment.
    #[must_use]
    pub fn env(mut self, env: EnvConfig) -> Self {
        self.env = Some(env);
        self
    }

    /// Builds the client.
    ///
    /// Environment values seed the product id and data directory. A
    /// `DM_PUBLIC_KEY` (RSA PEM or Ed25519) is used when no verifier was
    /// supplied. A key that cannot be parsed is recorded in `lastError`
    /// and every signed response is then rejected.
    #[must_use]
    pub fn build(self) -> LicenseClient {
        let env = self.env.unwrap_or_else(EnvConfig::from_env);

        let mut license = ActivationMachine::new(self.options.policy);
        license.apply_defaults(
            env.default_app_id.as_deref(),
            env.data_path_override.as_deref(),
        );

        let verifier = self.verifier.or_else(|| {
            let encoded = env.default_public_key.as_deref()?;
            let verifier: Arc<dyn SignatureVerifier> = match AuthorityVerifier::parse(encoded) {
                Ok(v) => Arc::new(v),
                Err(e) => {
                    warn!("Unusable {}, responses will be rejected: {}", ENV_DM_PUBLIC_KEY, e);
                    license.errors_mut().record(ErrorDetail::new(
                        ErrorCategory::Configuration,
                        ErrorKind::Configuration,
                        format!("{ENV_DM_PUBLIC_KEY} is not a usable public key: {e}"),
                    ));
                    Arc::new(RejectAll)
                }
            };
            Some(verifier)
        });

        let update = UpdateMachine::new();
        let (update_tx, _) = watch::channel(UpdateEvent::of(&update));

        LicenseClient {
            transport: self.transport,
            fingerprint: self.fingerprint,
            store: self.store,
            installer: self.installer,
            clock: self.clock,
            verifier,
            options: self.options,
            env,
            state: Mutex::new(ClientState {
                license,
                update,
                download_cancel: None,
                loaded: false,
                persisted_notice: None,
                last_status: None,
                write_seq: 0,
            }),
            written: Arc::default(),
            update_tx,
            license_callback: CallbackSlot::default(),
            progress_callback: CallbackSlot::default(),
        }
    }
}

/// Stands in for a configured key that failed to parse.
struct RejectAll;

impl SignatureVerifier for RejectAll {
    fn verify(&self, _message: &[u8], _signature: &[u8]) -> bool {
        false
    }
}

// ── Client ──────────────────────────────────────────────────────

struct ClientState {
    license: ActivationMachine,
    update: UpdateMachine,
    download_cancel: Option<CancellationToken>,
    /// Whether the stored document has been read for this data directory.
    loaded: bool,
    /// Post-update notice as it should be written to the store.
    persisted_notice: Option<PostUpdateNotice>,
    last_status: Option<LicenseStatus>,
    /// Sequence handed to the most recent [`PendingWrite`].
    write_seq: u64,
}

/// A stored document captured under the state lock and written after it
/// is released.
struct PendingWrite {
    store: Arc<dyn PersistentStore>,
    document: StoredState,
    seq: u64,
}

impl PendingWrite {
    /// Writes the document unless a later one already reached the store.
    fn write(self, written: &Mutex<u64>) -> StoreResult<()> {
        let mut last = written.lock().unwrap_or_else(PoisonError::into_inner);
        if *last >= self.seq {
            debug!("Skipping superseded license state write");
            return Ok(());
        }
        self.document.save_to(self.store.as_ref())?;
        *last = self.seq;
        Ok(())
    }
}

/// License activation and update client.
///
/// Every method takes `&self`; share the client through an `Arc` to drive
/// it from several tasks.
pub struct LicenseClient {
    transport: Arc<dyn Transport>,
    fingerprint: Option<Arc<dyn FingerprintProvider>>,
    store: Option<Arc<dyn PersistentStore>>,
    installer: Arc<dyn Installer>,
    clock: Arc<dyn Clock>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
    options: ClientOptions,
    env: EnvConfig,
    state: Mutex<ClientState>,
    /// Sequence of the last document written to the store.
    written: Arc<Mutex<u64>>,
    update_tx: watch::Sender<UpdateEvent>,
    license_callback: CallbackSlot<dyn Fn(LicenseStatus) + Send + Sync>,
    progress_callback: CallbackSlot<dyn Fn(dm_update::DownloadProgress) + Send + Sync>,
}

impl LicenseClient {
    /// Starts building a client that talks through `transport`.
    pub fn builder(transport: Arc<dyn Transport>) -> LicenseClientBuilder {
        LicenseClientBuilder {
            transport,
            fingerprint: None,
            store: None,
            installer: Arc::new(ProcessInstaller),
            clock: Arc::new(SystemClock),
            verifier: None,
            options: ClientOptions::default(),
            env: None,
        }
    }

    /// Returns the client options.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns the environment the client was built with.
    #[must_use]
    pub fn env(&self) -> &EnvConfig {
        &self.env
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, st: &ClientState) {
        self.update_tx.send_replace(UpdateEvent::of(&st.update));
    }

    // ── Configuration ───────────────────────────────────────────

    /// Sets the vendor-defined product data.
    ///
    /// # Errors
    ///
    /// Fails once activation has started.
    pub fn set_product_data(&self, data: &str) -> LicenseResult<()> {
        self.lock().license.set_product_data(data)
    }

    /// Sets the product id and flags.
    ///
    /// # Errors
    ///
    /// Fails on a blank id or once activation has started.
    pub fn set_product_id(&self, id: &str, flags: u32) -> LicenseResult<()> {
        let mut st = self.lock();
        st.license.set_product_id(id, flags)?;
        st.loaded = false;
        debug!("Product id set to {}", id);
        Ok(())
    }

    /// Sets the directory for persisted state and downloads.
    ///
    /// # Errors
    ///
    /// Fails on a blank path or once activation has started.
    pub fn set_data_directory(&self, path: impl Into<PathBuf>) -> LicenseResult<()> {
        let mut st = self.lock();
        st.license.set_data_directory(path)?;
        st.loaded = false;
        Ok(())
    }

    /// Enables verbose request logging. Secrets stay redacted.
    ///
    /// # Errors
    ///
    /// Fails once activation has started.
    pub fn set_debug_mode(&self, enabled: bool) -> LicenseResult<()> {
        self.lock().license.set_debug_mode(enabled)
    }

    /// Overrides the computed device fingerprint. Blank resets it.
    ///
    /// # Errors
    ///
    /// Fails once activation has started.
    pub fn set_custom_fingerprint(&self, fingerprint: &str) -> LicenseResult<()> {
        self.lock().license.set_custom_fingerprint(fingerprint)
    }

    /// Stores the license key to activate.
    ///
    /// # Errors
    ///
    /// Fails on a blank key or while an activation exists.
    pub fn set_license_key(&self, key: &str) -> LicenseResult<()> {
        self.lock().license.set_license_key(key)
    }

    /// Returns the stored license key.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] when no key is set.
    pub fn get_license_key(&self) -> LicenseResult<String> {
        self.lock()
            .license
            .license_key()
            .map(|key| key.as_str().to_string())
    }

    /// Returns the activation lifecycle state.
    #[must_use]
    pub fn activation_state(&self) -> ActivationState {
        self.lock().license.state()
    }

    // ── Activation ──────────────────────────────────────────────

    fn device_fingerprint(&self) -> String {
        match &self.fingerprint {
            Some(provider) => provider.compute(),
            None => {
                let namespace = self
                    .lock()
                    .license
                    .config()
                    .identity()
                    .map(|id| id.product_id.clone())
                    .unwrap_or_default();
                HardwareFingerprint::new(namespace).compute()
            }
        }
    }

    fn request_context(&self) -> RequestContext {
        RequestContext {
            fingerprint: self.device_fingerprint(),
            nonce: uuid::Uuid::new_v4().to_string(),
            client_version: self.options.app_version.clone(),
        }
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.options.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    async fn post(&self, endpoint: &str, body: &[u8]) -> Result<TransportResponse, TransportError> {
        let options = RequestOptions::with_timeout(self.options.timeout);
        match tokio::time::timeout(
            self.options.timeout,
            self.transport.post(endpoint, body, &options),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout_ms())),
        }
    }

    async fn license_round_trip(
        &self,
        endpoint: &str,
        request: &ActivationRequest,
        debug_mode: bool,
    ) -> LicenseResult<TransportResponse> {
        let body = encode_canonical(&request.payload)?;
        if debug_mode {
            debug!("POST {} {}", endpoint, redacted_payload(&request.payload));
        }
        Ok(self.post(endpoint, &body).await?)
    }

    fn grant_from_response(
        &self,
        response: &TransportResponse,
        nonce: &str,
    ) -> LicenseResult<LicenseGrant> {
        if !response.is_success() {
            return Err(rejection_from_response(response));
        }
        let envelope = Envelope::parse(&response.body)?;
        match &self.verifier {
            Some(verifier) => envelope.verify(verifier.as_ref(), nonce)?,
            None => debug!("No public key configured, response signature not checked"),
        }
        LicenseGrant::from_envelope(&envelope)
    }

    /// Activates the stored license key with the licensing authority.
    ///
    /// Returns true on success. On failure the reason is available from
    /// [`get_last_activation_error`](Self::get_last_activation_error).
    pub async fn activate_license(&self) -> bool {
        let ctx = self.request_context();
        let (request, debug_mode) = {
            let mut st = self.lock();
            match st.license.begin_activation(ctx) {
                Ok(request) => (request, st.license.config().debug_mode()),
                Err(e) => {
                    warn!("Activation not started: {}", e);
                    return false;
                }
            }
        };

        info!(
            "Activating license {}",
            request.payload.license_key.redacted()
        );
        let outcome = match self
            .license_round_trip(&self.options.endpoints.activate, &request, debug_mode)
            .await
        {
            Ok(response) => self.grant_from_response(&response, &request.payload.nonce),
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            warn!("Activation failed: {}", e);
        }

        let now = self.clock.now();
        let (activated, pending) = {
            let mut st = self.lock();
            let activated = st.license.complete_activation(request.attempt, outcome, now);
            let pending = if activated {
                self.prepare_persist(&mut st)
            } else {
                None
            };
            (activated, pending)
        };
        self.persist_unlocked(pending).await;
        if activated {
            info!("License activated");
        }
        activated
    }

    async fn validate_remote(
        &self,
        request: &ActivationRequest,
        debug_mode: bool,
    ) -> ValidationResponse {
        let response = match self
            .license_round_trip(&self.options.endpoints.validate, request, debug_mode)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!("Validation unreachable: {}", e);
                return ValidationResponse::Unreachable(e);
            }
        };
        match self.grant_from_response(&response, &request.payload.nonce) {
            Ok(grant) => ValidationResponse::Confirmed(grant),
            Err(e @ LicenseError::ActivationRejected { .. }) => ValidationResponse::Rejected(e),
            Err(e) => {
                warn!("Unusable validation response: {}", e);
                ValidationResponse::Unreachable(e)
            }
        }
    }

    /// Checks with the server that the activation is still genuine.
    ///
    /// Falls back to the cached records while the sync grace period is
    /// open. A check started while another is in flight answers from the
    /// cached records without a round-trip.
    pub async fn is_license_genuine(&self) -> bool {
        let ctx = self.request_context();
        let (request, debug_mode) = {
            let mut st = self.lock();
            match st.license.begin_validation(ctx, self.clock.now()) {
                ValidationStart::Decided(genuine) => return genuine,
                ValidationStart::Remote(request) => (request, st.license.config().debug_mode()),
            }
        };

        let response = self.validate_remote(&request, debug_mode).await;
        let now = self.clock.now();
        let (genuine, pending) = {
            let mut st = self.lock();
            let genuine = st.license.complete_validation(request.attempt, response, now);
            (genuine, self.prepare_persist(&mut st))
        };
        self.persist_unlocked(pending).await;
        debug!("Genuine check: {}", genuine);
        genuine
    }

    /// Checks expiry and revocation from the cached records only.
    pub fn is_license_valid(&self) -> bool {
        let now = self.clock.now();
        self.lock().license.is_license_valid(now)
    }

    /// Runs a genuine and validity check and notifies the license callback
    /// when the status differs from the last background check.
    pub async fn run_background_check(&self) -> LicenseStatus {
        let genuine = self.is_license_genuine().await;
        let valid = self.is_license_valid();
        let status = LicenseStatus { genuine, valid };

        let changed = {
            let mut st = self.lock();
            let changed = st.last_status != Some(status);
            st.last_status = Some(status);
            changed
        };
        if changed {
            info!("License status changed: genuine={} valid={}", genuine, valid);
            if let Some(callback) = self.license_callback.get() {
                callback(status);
            }
        }
        status
    }

    /// Registers the license status callback. `None` unregisters.
    pub fn set_license_callback(&self, callback: Option<LicenseCallback>) {
        self.license_callback.set(callback);
    }

    /// Registers the download progress callback. `None` unregisters.
    pub fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        self.progress_callback.set(callback);
    }

    /// Clears the activation, its cached records and every recorded error.
    ///
    /// Configured values are kept. An activation or validation in flight
    /// is discarded when it completes.
    pub fn reset(&self) {
        let pending = {
            let mut st = self.lock();
            st.license.reset();
            st.last_status = None;
            self.prepare_persist(&mut st)
        };
        self.write_logged(pending);
        info!("License state reset");
    }

    /// Restores an activation persisted by an earlier session.
    ///
    /// Returns false when nothing was stored.
    ///
    /// # Errors
    ///
    /// Fails when the stored activation belongs to another product or key,
    /// or when an activation already exists.
    pub fn restore_activation(&self) -> LicenseResult<bool> {
        let mut st = self.lock();
        let Some(snapshot) = self.load_stored(&mut st) else {
            return Ok(false);
        };
        let activation_id = snapshot.metadata.activation.activation_id.clone();
        st.license.restore(snapshot)?;
        info!("Restored activation {}", activation_id);
        Ok(true)
    }

    // ── Accessors ───────────────────────────────────────────────

    /// Returns the cached records.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] when not activated.
    pub fn metadata(&self) -> LicenseResult<LicenseMetadata> {
        self.lock()
            .license
            .metadata()
            .cloned()
            .ok_or(LicenseError::NotActivated)
    }

    /// Returns the server-issued activation id.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] when not activated.
    pub fn get_activation_id(&self) -> LicenseResult<String> {
        self.lock().license.activation_id().map(str::to_string)
    }

    /// Returns the initial and current activation modes.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] when not activated.
    pub fn get_activation_mode(&self) -> LicenseResult<ActivationModes> {
        self.lock().license.activation_mode()
    }

    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] when not activated.
    pub fn get_activation_creation_date(&self) -> LicenseResult<DateTime<Utc>> {
        self.lock().license.activation_creation_date()
    }

    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] when not activated.
    pub fn get_activation_last_synced_date(&self) -> LicenseResult<DateTime<Utc>> {
        self.lock().license.activation_last_synced_date()
    }

    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] when not activated.
    pub fn get_license_activation_date(&self) -> LicenseResult<DateTime<Utc>> {
        self.lock().license.license_activation_date()
    }

    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] when not activated.
    pub fn get_license_creation_date(&self) -> LicenseResult<DateTime<Utc>> {
        self.lock().license.license_creation_date()
    }

    /// Returns the license expiry, or `None` for a perpetual license.
    ///
    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] when not activated.
    pub fn get_license_expiry_date(&self) -> LicenseResult<Option<DateTime<Utc>>> {
        self.lock().license.license_expiry_date()
    }

    /// # Errors
    ///
    /// Returns [`LicenseError::NotActivated`] when not activated.
    pub fn get_server_sync_grace_period_expiry_date(&self) -> LicenseResult<DateTime<Utc>> {
        self.lock().license.server_sync_grace_period_expiry_date()
    }

    /// Returns the most recent failure of any operation.
    #[must_use]
    pub fn get_last_error(&self) -> Option<ErrorDetail> {
        self.lock().license.errors().last_error().cloned()
    }

    /// Returns the most recent activation failure.
    #[must_use]
    pub fn get_last_activation_error(&self) -> Option<ActivationFailure> {
        self.lock().license.errors().last_activation_error().cloned()
    }

    // ── Persistence ─────────────────────────────────────────────

    fn resolve_store(&self, st: &ClientState) -> Option<Arc<dyn PersistentStore>> {
        if let Some(store) = &self.store {
            return Some(Arc::clone(store));
        }
        let dir = data_directory(&st.license)?;
        Some(Arc::new(FileStore::new(dir)))
    }

    /// Reads the stored document and returns its activation snapshot.
    ///
    /// The post-update notice is taken over once per data directory.
    fn load_stored(&self, st: &mut ClientState) -> Option<LicenseSnapshot> {
        let stored = match self.resolve_store(st) {
            Some(store) => StoredState::load_from(store.as_ref()).unwrap_or_else(|e| {
                warn!("Ignoring unreadable license store: {}", e);
                StoredState::default()
            }),
            None => StoredState::default(),
        };
        if !st.loaded {
            st.loaded = true;
            st.update.set_post_update_notice(stored.post_update.clone());
            st.persisted_notice = stored.post_update;
        }
        stored.license
    }

    /// Captures the document to persist. The caller writes it once the
    /// state lock is released.
    fn prepare_persist(&self, st: &mut ClientState) -> Option<PendingWrite> {
        if !st.loaded {
            self.load_stored(st);
        }
        let Some(store) = self.resolve_store(st) else {
            debug!("No data directory configured, state not persisted");
            return None;
        };
        st.write_seq += 1;
        Some(PendingWrite {
            store,
            document: StoredState {
                license: st.license.snapshot(),
                post_update: st.persisted_notice.clone(),
            },
            seq: st.write_seq,
        })
    }

    fn write_logged(&self, pending: Option<PendingWrite>) {
        if let Some(pending) = pending
            && let Err(e) = pending.write(&self.written)
        {
            warn!("Failed to persist license state: {}", e);
        }
    }

    /// Writes on the blocking pool so the calling task is not stalled.
    async fn persist_unlocked(&self, pending: Option<PendingWrite>) {
        let Some(pending) = pending else {
            return;
        };
        let written = Arc::clone(&self.written);
        match tokio::task::spawn_blocking(move || pending.write(&written)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to persist license state: {}", e),
            Err(e) => warn!("License state write did not finish: {}", e),
        }
    }

    // ── Updates ─────────────────────────────────────────────────

    async fn fetch_update(
        &self,
        request: &UpdateRequest,
        debug_mode: bool,
    ) -> UpdateResult<Option<UpdateInfo>> {
        let body = encode_canonical(request)?;
        if debug_mode {
            debug!(
                "POST {} {}",
                self.options.endpoints.updates,
                String::from_utf8_lossy(&body)
            );
        }
        let response = self.post(&self.options.endpoints.updates, &body).await?;
        UpdateInfo::from_response(response.status, &response.body)
    }

    /// Asks the update service for a newer version.
    ///
    /// Never fails outright: failures come back as [`UpdateCheck::Failed`]
    /// and are recorded in `lastError`.
    pub async fn check_for_updates(&self, options: &UpdateOptions) -> UpdateCheck {
        let fingerprint = self.device_fingerprint();
        let (request, debug_mode) = {
            let mut st = self.lock();
            if let Err(e) = st.update.begin_check() {
                st.license.errors_mut().record(e.detail());
                return UpdateCheck::Failed(e);
            }
            self.publish(&st);
            let config = st.license.config();
            let request = UpdateRequest {
                product_id: config.identity().ok().map(|id| id.product_id.clone()),
                current_version: self.options.app_version.clone(),
                channel: options.channel.clone(),
                activation_id: st.license.activation_id().ok().map(str::to_string),
                fingerprint,
            };
            (request, config.debug_mode())
        };

        let result = self.fetch_update(&request, debug_mode).await;

        let mut st = self.lock();
        let result = st.update.finish_check(result);
        self.publish(&st);
        match result {
            Ok(Some(info)) => {
                st.license.errors_mut().clear_category(ErrorCategory::Update);
                info!("Update {} available", info.version);
                UpdateCheck::Available(info)
            }
            Ok(None) => {
                st.license.errors_mut().clear_category(ErrorCategory::Update);
                debug!("No update available");
                UpdateCheck::UpToDate
            }
            Err(e) => {
                warn!("Update check failed: {}", e);
                st.license.errors_mut().record(e.detail());
                UpdateCheck::Failed(e)
            }
        }
    }

    fn download_directory(&self, st: &ClientState) -> PathBuf {
        data_directory(&st.license)
            .unwrap_or_else(std::env::temp_dir)
            .join("updates")
    }

    /// Streams chunks into `file`. Returns the byte count and digest, or
    /// `None` when the download was cancelled.
    async fn download_chunks(
        &self,
        generation: u64,
        url: &str,
        token: &CancellationToken,
        file: &mut tokio::fs::File,
    ) -> UpdateResult<Option<(u64, String)>> {
        let mut hasher = Sha256::new();
        let mut received: u64 = 0;
        let mut poll = tokio::time::interval(self.options.effective_poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let request = RequestOptions {
                timeout: self.options.timeout,
                cancel: Some(token.clone()),
            };
            let fetch = tokio::time::timeout(
                self.options.timeout,
                self.transport
                    .fetch_range(url, received, self.options.chunk_size, &request),
            );
            tokio::pin!(fetch);

            let chunk = loop {
                tokio::select! {
                    res = &mut fetch => break Some(res),
                    () = token.cancelled() => break None,
                    _ = poll.tick() => {
                        if !self.lock().update.is_current_download(generation) {
                            break None;
                        }
                    }
                }
            };
            let bytes = match chunk {
                None | Some(Ok(Err(TransportError::Cancelled))) => return Ok(None),
                Some(Ok(Ok(bytes))) => bytes,
                Some(Ok(Err(e))) => return Err(e.into()),
                Some(Err(_)) => return Err(TransportError::Timeout(self.timeout_ms()).into()),
            };
            if bytes.is_empty() {
                break;
            }

            file.write_all(&bytes).await?;
            hasher.update(&bytes);
            received += bytes.len() as u64;

            let progress = self.lock().update.record_progress(generation, received);
            let Some(progress) = progress else {
                return Ok(None);
            };
            if let Some(callback) = self.progress_callback.get() {
                callback(progress);
            }
        }

        file.flush().await?;
        Ok(Some((received, hex::encode(hasher.finalize()))))
    }

    /// Downloads and verifies the package. Returns `None` when cancelled.
    async fn fetch_package(
        &self,
        ticket: &DownloadTicket,
        channel: Option<&str>,
        token: &CancellationToken,
        dir: &Path,
    ) -> UpdateResult<Option<PathBuf>> {
        let info = &ticket.info;
        let url = info
            .download_url
            .as_deref()
            .ok_or_else(|| EnvelopeError::MissingField("downloadUrl".to_string()))?;
        let url = channel_url(url, channel);

        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(package_file_name(&info.version));
        let partial = path.with_extension("part");

        let mut file = tokio::fs::File::create(&partial).await?;
        let fetched = self
            .download_chunks(ticket.generation, &url, token, &mut file)
            .await;
        drop(file);

        let verified = fetched.and_then(|fetched| {
            fetched
                .map(|(received, digest)| verify_package(info, received, &digest))
                .transpose()
        });
        match verified {
            Ok(Some(())) => {
                tokio::fs::rename(&partial, &path).await?;
                Ok(Some(path))
            }
            other => {
                let _ = tokio::fs::remove_file(&partial).await;
                other.map(|_| None)
            }
        }
    }

    /// Downloads the available update into the data directory.
    ///
    /// A channel in `options` is sent as the `channel` query parameter of
    /// the package URL. Cancellation through
    /// [`cancel_update_download`](Self::cancel_update_download) takes effect
    /// within the configured poll interval.
    pub async fn download_update(&self, options: &UpdateOptions) -> DownloadOutcome {
        let (ticket, token, dir) = {
            let mut st = self.lock();
            let ticket = match st.update.begin_download() {
                Ok(ticket) => ticket,
                Err(e) => {
                    st.license.errors_mut().record(e.detail());
                    return DownloadOutcome::Failed(e);
                }
            };
            let token = CancellationToken::new();
            st.download_cancel = Some(token.clone());
            self.publish(&st);
            (ticket, token, self.download_directory(&st))
        };
        info!(
            "Downloading update {} ({} bytes)",
            ticket.info.version, ticket.info.download_size_bytes
        );

        let result = self
            .fetch_package(&ticket, options.channel.as_deref(), &token, &dir)
            .await;

        let (outcome, orphan) = {
            let mut st = self.lock();
            if st.update.is_current_download(ticket.generation) {
                st.download_cancel = None;
            }
            match result {
                Ok(None) => (DownloadOutcome::Cancelled, None),
                Ok(Some(path)) => {
                    if st.update.finish_download(ticket.generation, Ok(path.clone())) {
                        self.publish(&st);
                        st.license.errors_mut().clear_category(ErrorCategory::Update);
                        (DownloadOutcome::Completed(path), None)
                    } else {
                        (DownloadOutcome::Cancelled, Some(path))
                    }
                }
                Err(e) => {
                    if st.update.finish_download(ticket.generation, Err(e.clone())) {
                        self.publish(&st);
                        st.license.errors_mut().record(e.detail());
                        (DownloadOutcome::Failed(e), None)
                    } else {
                        (DownloadOutcome::Cancelled, None)
                    }
                }
            }
        };
        if let Some(path) = orphan {
            let _ = tokio::fs::remove_file(&path).await;
        }
        match &outcome {
            DownloadOutcome::Completed(path) => info!("Update saved to {}", path.display()),
            DownloadOutcome::Cancelled => info!("Update download cancelled"),
            DownloadOutcome::Failed(e) => warn!("Update download failed: {}", e),
        }
        outcome
    }

    /// Cancels an in-flight download and returns to `Idle`.
    ///
    /// A no-op returning false when nothing is downloading.
    pub fn cancel_update_download(&self) -> bool {
        let mut st = self.lock();
        if !st.update.cancel() {
            return false;
        }
        if let Some(token) = st.download_cancel.take() {
            token.cancel();
        }
        self.publish(&st);
        true
    }

    /// Returns the current update state.
    #[must_use]
    pub fn get_update_state(&self) -> UpdateState {
        self.lock().update.state()
    }

    /// Returns the full update view.
    #[must_use]
    pub fn update_snapshot(&self) -> UpdateSnapshot {
        self.lock().update.snapshot()
    }

    /// Waits until the update state changes from its value at call time.
    pub async fn wait_for_update_state_change(&self, timeout: Duration) -> UpdateWait {
        let since = self.update_tx.borrow().sequence;
        self.wait_for_update_state_change_since(since, timeout)
            .await
    }

    /// Waits for any transition after `sequence`.
    ///
    /// Returns immediately when one already happened, so a caller that
    /// remembers the last sequence it saw never misses a transition.
    pub async fn wait_for_update_state_change_since(
        &self,
        sequence: u64,
        timeout: Duration,
    ) -> UpdateWait {
        let mut rx = self.update_tx.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|event| event.sequence > sequence)
                .await
                .map(|event| *event)
        })
        .await;
        match waited {
            Ok(Ok(event)) => UpdateWait::Changed(event),
            _ => UpdateWait::TimedOut(*self.update_tx.borrow()),
        }
    }

    /// Returns the notice left by the last installed update until it is
    /// acknowledged.
    #[must_use]
    pub fn get_post_update_info(&self) -> Option<PostUpdateNotice> {
        let mut st = self.lock();
        if !st.loaded {
            self.load_stored(&mut st);
        }
        st.update.post_update_info().cloned()
    }

    /// Acknowledges the post-update notice. Acknowledging twice succeeds.
    ///
    /// # Errors
    ///
    /// Fails when the acknowledgement cannot be persisted.
    pub fn ack_post_update_info(&self) -> UpdateResult<()> {
        let pending = {
            let mut st = self.lock();
            if !st.loaded {
                self.load_stored(&mut st);
            }
            if !st.update.ack_post_update_info() {
                return Ok(());
            }
            st.persisted_notice = st.update.post_update_notice().cloned();
            self.prepare_persist(&mut st)
        };
        if let Some(pending) = pending {
            pending
                .write(&self.written)
                .map_err(|e| UpdateError::Io(e.to_string()))?;
        }
        info!("Post-update notice acknowledged");
        Ok(())
    }

    /// Hands the downloaded package to the installer.
    ///
    /// On [`QuitAndInstallResult::Accepted`] the host must exit. Only valid
    /// in `Downloaded`; any other state is rejected without calling the
    /// installer.
    pub fn quit_and_install(&self, options: &InstallOptions) -> QuitAndInstallResult {
        let (package, notice) = {
            let mut st = self.lock();
            match st.update.begin_install() {
                Ok(package) => {
                    self.publish(&st);
                    (package, st.update.pending_post_update_notice())
                }
                Err(e) => {
                    warn!("Install rejected: {}", e);
                    st.license.errors_mut().record(e.detail());
                    return QuitAndInstallResult::Rejected {
                        reason: e.to_string(),
                    };
                }
            }
        };

        info!("Launching installer {}", package.display());
        let outcome = self.installer.launch_and_exit(&package, &options.restart_args);

        let mut st = self.lock();
        let result = st.update.finish_install(outcome);
        self.publish(&st);
        let mut pending = None;
        match &result {
            QuitAndInstallResult::Accepted { .. } => {
                if notice.is_some() {
                    if !st.loaded {
                        self.load_stored(&mut st);
                    }
                    st.persisted_notice = notice;
                    pending = self.prepare_persist(&mut st);
                }
            }
            QuitAndInstallResult::Rejected { reason } => {
                warn!("Installer refused: {}", reason);
                st.license
                    .errors_mut()
                    .record(UpdateError::InstallRejected(reason.clone()).detail());
            }
            QuitAndInstallResult::Failed { error } => {
                warn!("Installer failed: {}", error);
                st.license
                    .errors_mut()
                    .record(UpdateError::Io(error.clone()).detail());
            }
        }
        drop(st);
        self.write_logged(pending);
        result
    }
}

fn data_directory(license: &ActivationMachine) -> Option<PathBuf> {
    let config = license.config();
    config.data_directory().map(Path::to_path_buf).or_else(|| {
        config
            .identity()
            .ok()
            .and_then(|id| default_data_directory(&id.product_id))
    })
}

/// Maps a non-2xx response to a taxonomy rejection.
///
/// A body of the form `{"error": {"code": ..., "message": ...}}` with a
/// known code wins over the status.
fn rejection_from_response(response: &TransportResponse) -> LicenseError {
    let body: Option<Value> = serde_json::from_slice(&response.body).ok();
    let error = body.as_ref().and_then(|v| v.get("error"));
    let field = |name: &str| {
        error
            .and_then(|e| e.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let code = field("code")
        .as_deref()
        .and_then(ActivationErrorCode::from_symbol)
        .or_else(|| ActivationErrorCode::from_http_status(response.status))
        .unwrap_or(ActivationErrorCode::ServerError);
    let message = field("message").unwrap_or_else(|| format!("HTTP {}", response.status));
    LicenseError::rejected(code, message)
}

fn redacted_payload(payload: &RequestPayload) -> String {
    let mut value = serde_json::to_value(payload).unwrap_or_default();
    if let Some(key) = value.get_mut("licenseKey") {
        *key = Value::String(payload.license_key.redacted());
    }
    value.to_string()
}

fn package_file_name(version: &str) -> String {
    let version: String = version
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    format!("update-{version}.pkg")
}

/// Appends `channel` to the query of `url`.
fn channel_url(url: &str, channel: Option<&str>) -> String {
    let Some(channel) = channel.filter(|c| !c.is_empty()) else {
        return url.to_string();
    };
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}channel={}", urlencoding::encode(channel))
}

fn verify_package(info: &UpdateInfo, received: u64, digest: &str) -> UpdateResult<()> {
    if info.download_size_bytes > 0 && received != info.download_size_bytes {
        return Err(UpdateError::IntegrityMismatch {
            expected: format!("{} bytes", info.download_size_bytes),
            actual: format!("{received} bytes"),
        });
    }
    if let Some(expected) = &info.sha256
        && !expected.eq_ignore_ascii_case(digest)
    {
        return Err(UpdateError::IntegrityMismatch {
            expected: expected.clone(),
            actual: digest.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_prefers_body_code() {
        let response = TransportResponse::new(
            400,
            r#"{"error":{"code":"LICENSE_REVOKED","message":"revoked by vendor"}}"#,
        );
        match rejection_from_response(&response) {
            LicenseError::ActivationRejected { code, message } => {
                assert_eq!(code, ActivationErrorCode::LicenseRevoked);
                assert_eq!(message, "revoked by vendor");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejection_falls_back_to_status() {
        let response = TransportResponse::new(409, "conflict");
        assert_eq!(
            rejection_from_response(&response).code(),
            Some(ActivationErrorCode::ActivationLimitReached)
        );
    }

    #[test]
    fn package_names_are_sanitized() {
        assert_eq!(package_file_name("1.2.0"), "update-1.2.0.pkg");
        assert_eq!(package_file_name("../2.0 beta"), "update-.._2.0_beta.pkg");
    }

    #[test]
    fn channel_is_added_to_the_query() {
        let url = "https://updates.example.com/app.pkg";
        assert_eq!(channel_url(url, None), url);
        assert_eq!(channel_url(url, Some("")), url);
        assert_eq!(
            channel_url(url, Some("beta")),
            "https://updates.example.com/app.pkg?channel=beta"
        );
        assert_eq!(
            channel_url("https://u.example.com/a.pkg?sig=1", Some("early access")),
            "https://u.example.com/a.pkg?sig=1&channel=early%20access"
        );
    }

    #[test]
    fn digest_comparison_ignores_case() {
        let info = UpdateInfo {
            version: "1.0.0".into(),
            release_notes: String::new(),
            download_size_bytes: 3,
            post_update_info: None,
            download_url: None,
            sha256: Some("ABCDEF".into()),
        };
        assert!(verify_package(&info, 3, "abcdef").is_ok());
        assert!(verify_package(&info, 2, "abcdef").is_err());
        assert!(verify_package(&info, 3, "000000").is_err());
    }
}
