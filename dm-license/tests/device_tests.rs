use dm_license::{FingerprintProvider, HardwareFingerprint, StaticFingerprint};

#[test]
fn hardware_fingerprint_is_stable() {
    let provider = HardwareFingerprint::new("p1");
    assert_eq!(provider.compute(), provider.compute());
}

#[test]
fn hardware_fingerprint_is_hex() {
    let fp = HardwareFingerprint::new("p1").compute();
    assert_eq!(fp.len(), 32);
    assert!(fp.bytes().all(|b| b.is_ascii_hexdigit()));
}

#[test]
fn namespace_changes_fingerprint() {
    assert_ne!(
        HardwareFingerprint::new("vendor-a").compute(),
        HardwareFingerprint::new("vendor-b").compute()
    );
}

#[test]
fn static_fingerprint_returns_value() {
    assert_eq!(StaticFingerprint("fixed".into()).compute(), "fixed");
}
