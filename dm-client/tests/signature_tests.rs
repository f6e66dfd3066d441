mod common;

use common::{
    RSA_PUBLIC_KEY_PEM, RsaSigningTransport, SigningTransport, standard_success, t0, test_keypair,
};
use dm_client::{ActivationErrorCode, ActivationState, EnvConfig, LicenseClient, MemoryStore};
use dm_license::{ManualClock, StaticFingerprint};
use std::sync::Arc;

fn signed_client(tamper: bool, with_verifier: bool) -> LicenseClient {
    let (key, verifier) = test_keypair();
    let transport = SigningTransport {
        key,
        body: standard_success(),
        tamper,
    };
    let mut builder = LicenseClient::builder(Arc::new(transport))
        .fingerprint(Arc::new(StaticFingerprint("fp-test".into())))
        .store(Arc::new(MemoryStore::new()))
        .clock(Arc::new(ManualClock::new(t0())))
        .env(EnvConfig::default());
    if with_verifier {
        builder = builder.verifier(Arc::new(verifier));
    }
    let client = builder.build();
    client.set_product_id("p1", 0).unwrap();
    client.set_license_key("AAAA-BBBB").unwrap();
    client
}

#[tokio::test]
async fn signed_response_activates() {
    let client = signed_client(false, true);
    assert!(client.activate_license().await);
    assert_eq!(client.get_activation_id().unwrap(), "act-1");
}

#[tokio::test]
async fn tampered_response_is_rejected() {
    let client = signed_client(true, true);
    assert!(!client.activate_license().await);
    assert_eq!(client.activation_state(), ActivationState::KeySet);
    assert_eq!(
        client.get_last_activation_error().unwrap().code,
        ActivationErrorCode::SignatureInvalid
    );
}

#[tokio::test]
async fn unsigned_response_is_rejected_when_key_configured() {
    let (_, verifier) = test_keypair();
    let transport = dm_client::mock::MockTransport::new();
    transport.push_json(200, standard_success());
    let client = LicenseClient::builder(Arc::new(transport))
        .fingerprint(Arc::new(StaticFingerprint("fp-test".into())))
        .clock(Arc::new(ManualClock::new(t0())))
        .store(Arc::new(MemoryStore::new()))
        .verifier(Arc::new(verifier))
        .env(EnvConfig::default())
        .build();
    client.set_product_id("p1", 0).unwrap();
    client.set_license_key("AAAA-BBBB").unwrap();

    assert!(!client.activate_license().await);
    assert_eq!(
        client.get_last_activation_error().unwrap().code,
        ActivationErrorCode::SignatureInvalid
    );
}

#[tokio::test]
async fn public_key_from_env_is_used() {
    let (key, verifier) = test_keypair();
    let encoded = hex::encode(verifier.to_bytes());
    let env = EnvConfig {
        default_public_key: Some(encoded),
        default_app_id: Some("p1".into()),
        ..EnvConfig::default()
    };
    let transport = SigningTransport {
        key,
        body: standard_success(),
        tamper: true,
    };
    let client = LicenseClient::builder(Arc::new(transport))
        .fingerprint(Arc::new(StaticFingerprint("fp-test".into())))
        .clock(Arc::new(ManualClock::new(t0())))
        .store(Arc::new(MemoryStore::new()))
        .env(env)
        .build();
    client.set_license_key("AAAA-BBBB").unwrap();

    assert!(!client.activate_license().await);
    assert_eq!(
        client.get_last_activation_error().unwrap().code,
        ActivationErrorCode::SignatureInvalid
    );
}

#[tokio::test]
async fn without_key_signatures_are_not_checked() {
    let client = signed_client(true, false);
    assert!(client.activate_license().await);
    assert_eq!(client.get_activation_id().unwrap(), "act-forged");
}

fn rsa_env_client(tamper: bool) -> LicenseClient {
    let env = EnvConfig {
        default_public_key: Some(RSA_PUBLIC_KEY_PEM.into()),
        default_app_id: Some("p1".into()),
        ..EnvConfig::default()
    };
    let transport = RsaSigningTransport {
        body: standard_success(),
        tamper,
    };
    let client = LicenseClient::builder(Arc::new(transport))
        .fingerprint(Arc::new(StaticFingerprint("fp-test".into())))
        .clock(Arc::new(ManualClock::new(t0())))
        .store(Arc::new(MemoryStore::new()))
        .env(env)
        .build();
    client.set_license_key("AAAA-BBBB").unwrap();
    client
}

#[tokio::test]
async fn rsa_public_key_from_env_verifies_responses() {
    let client = rsa_env_client(false);
    assert!(client.get_last_error().is_none());
    assert!(client.activate_license().await);
    assert_eq!(client.get_activation_id().unwrap(), "act-1");
}

#[tokio::test]
async fn rsa_public_key_from_env_rejects_tampering() {
    let client = rsa_env_client(true);
    assert!(!client.activate_license().await);
    assert_eq!(
        client.get_last_activation_error().unwrap().code,
        ActivationErrorCode::SignatureInvalid
    );
}

#[tokio::test]
async fn unsigned_response_is_rejected_with_rsa_key_from_env() {
    let env = EnvConfig {
        default_public_key: Some(RSA_PUBLIC_KEY_PEM.into()),
        default_app_id: Some("p1".into()),
        ..EnvConfig::default()
    };
    let transport = dm_client::mock::MockTransport::new();
    transport.push_json(200, standard_success());
    let client = LicenseClient::builder(Arc::new(transport))
        .fingerprint(Arc::new(StaticFingerprint("fp-test".into())))
        .clock(Arc::new(ManualClock::new(t0())))
        .store(Arc::new(MemoryStore::new()))
        .env(env)
        .build();
    client.set_license_key("AAAA-BBBB").unwrap();

    assert!(!client.activate_license().await);
    assert_eq!(
        client.get_last_activation_error().unwrap().code,
        ActivationErrorCode::SignatureInvalid
    );
}
