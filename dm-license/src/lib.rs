//! License activation core for the DistroMate client.
//!
//! Provides:
//! - The activation error taxonomy and stable error kinds
//! - The configuration store
//! - Activation and license records with the offline grace window
//! - The activation state machine, a pure engine driven by `dm-client`
//! - Device fingerprinting and clock abstractions
//!
//! # Offline Tolerance
//!
//! A genuine check consults the server. When the server cannot be reached
//! the cached records stand in for it until the sync grace period expires,
//! after which the check fails with a grace-period error.

pub mod activation;
pub mod clock;
pub mod codes;
pub mod config;
pub mod device;
pub mod error;
pub mod error_state;
pub mod key;
pub mod records;

pub use activation::{
    ActivationMachine, ActivationRequest, ActivationState, GenuinePolicy, LicenseSnapshot,
    RequestContext, RequestPayload, ValidationResponse, ValidationStart,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codes::{
    activation_error_name, activation_error_symbol_name, ActivationErrorCode, UNKNOWN_ERROR_NAME,
};
pub use config::{ConfigStore, LicenseConfig, ProductIdentity};
pub use device::{FingerprintProvider, HardwareFingerprint, StaticFingerprint};
pub use error::{ErrorKind, LicenseError, LicenseResult};
pub use error_state::{ActivationFailure, ErrorCategory, ErrorDetail, ErrorState};
pub use key::LicenseKey;
pub use records::{
    ActivationMode, ActivationModes, ActivationRecord, LicenseGrant, LicenseMetadata,
    LicenseRecord,
};
