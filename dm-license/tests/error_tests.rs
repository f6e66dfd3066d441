use dm_envelope::EnvelopeError;
use dm_license::{
    ActivationErrorCode, ActivationState, ErrorCategory, ErrorKind, ErrorState, LicenseError,
};

#[test]
fn error_display_configuration_locked() {
    let err = LicenseError::ConfigurationLocked;
    assert!(format!("{err}").contains("locked"));
}

#[test]
fn error_display_invalid_state() {
    let err = LicenseError::InvalidState {
        operation: "activate_license",
        state: ActivationState::Unconfigured,
    };
    let msg = format!("{err}");
    assert!(msg.contains("activate_license"));
    assert!(msg.contains("Unconfigured"));
}

#[test]
fn error_display_rejected() {
    let err = LicenseError::rejected(ActivationErrorCode::ActivationLimitReached, "3 of 3 used");
    let msg = format!("{err}");
    assert!(msg.contains("ActivationLimitReached"));
    assert!(msg.contains("3 of 3 used"));
}

#[test]
fn kinds() {
    assert_eq!(LicenseError::ConfigurationLocked.kind(), ErrorKind::Configuration);
    assert_eq!(
        LicenseError::InvalidArgument("x".into()).kind(),
        ErrorKind::Configuration
    );
    assert_eq!(LicenseError::NotActivated.kind(), ErrorKind::NotActivated);
    assert_eq!(LicenseError::Transport("t".into()).kind(), ErrorKind::Transport);
    assert_eq!(
        LicenseError::Envelope(EnvelopeError::NotAnObject).kind(),
        ErrorKind::EnvelopeParse
    );
    assert_eq!(LicenseError::Revoked.kind(), ErrorKind::ActivationRejected);
    assert_eq!(
        LicenseError::GracePeriodExpired { expired_at: None }.kind(),
        ErrorKind::GracePeriodExpired
    );
}

#[test]
fn codes_distinguish_network_rejection_and_malformed() {
    assert_eq!(
        LicenseError::Transport("timeout".into()).code(),
        Some(ActivationErrorCode::NetworkFailure)
    );
    assert_eq!(
        LicenseError::Envelope(EnvelopeError::MissingField("activationId".into())).code(),
        Some(ActivationErrorCode::MalformedResponse)
    );
    assert_eq!(
        LicenseError::Envelope(EnvelopeError::SignatureInvalid).code(),
        Some(ActivationErrorCode::SignatureInvalid)
    );
    assert_eq!(
        LicenseError::rejected(ActivationErrorCode::InvalidLicenseKey, "").code(),
        Some(ActivationErrorCode::InvalidLicenseKey)
    );
    assert_eq!(LicenseError::ConfigurationLocked.code(), None);
}

#[test]
fn kind_names_are_stable() {
    assert_eq!(ErrorKind::Configuration.name(), "ConfigurationError");
    assert_eq!(ErrorKind::EnvelopeParse.to_string(), "EnvelopeParseError");
    assert_eq!(ErrorKind::InstallRejected.name(), "InstallRejected");
}

// ── Error slots ─────────────────────────────────────────────────

#[test]
fn activation_failure_fills_both_slots() {
    let mut errors = ErrorState::new();
    errors.record_activation_failure(&LicenseError::rejected(
        ActivationErrorCode::ActivationLimitReached,
        "limit",
    ));

    let last = errors.last_error().unwrap();
    assert_eq!(last.kind, ErrorKind::ActivationRejected);
    assert_eq!(last.category, ErrorCategory::Activation);

    let activation = errors.last_activation_error().unwrap();
    assert_eq!(activation.code, ActivationErrorCode::ActivationLimitReached);
    assert_eq!(activation.name(), "ActivationLimitReached");
    assert_eq!(activation.detail.as_deref(), Some("limit"));
}

#[test]
fn uncoded_failures_only_fill_last_error() {
    let mut errors = ErrorState::new();
    errors.record_activation_failure(&LicenseError::ConfigurationLocked);
    assert!(errors.last_error().is_some());
    assert!(errors.last_activation_error().is_none());
}

#[test]
fn success_clears_only_its_own_category() {
    let mut errors = ErrorState::new();
    errors.record_error(ErrorCategory::Update, &LicenseError::Transport("down".into()));

    errors.clear_category(ErrorCategory::Validation);
    assert!(errors.last_error().is_some());

    errors.clear_category(ErrorCategory::Update);
    assert!(errors.last_error().is_none());
}

#[test]
fn newer_failures_overwrite() {
    let mut errors = ErrorState::new();
    errors.record_error(ErrorCategory::Validation, &LicenseError::NotActivated);
    errors.record_error(ErrorCategory::Validation, &LicenseError::Revoked);
    assert_eq!(errors.last_error().unwrap().code, Some(ActivationErrorCode::LicenseRevoked));
}
