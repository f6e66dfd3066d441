//! Shared test helpers for license tests.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use dm_envelope::Envelope;
use dm_license::{ActivationMachine, GenuinePolicy, LicenseGrant, RequestContext};

/// 2026-01-01T00:00:00Z.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// Builds a success envelope body as the licensing authority sends it.
pub fn success_json(activation_id: &str, synced: i64, grace_expiry: Option<i64>) -> String {
    let mut value = serde_json::json!({
        "activationId": activation_id,
        "activationMode": "server_sync",
        "creationDate": synced - 86_400,
        "lastSyncedDate": synced,
        "license": {
            "key": "AAAA-BBBB",
            "creationDate": synced - 30 * 86_400,
            "activationDate": synced,
        }
    });
    if let Some(expiry) = grace_expiry {
        value["serverSyncGracePeriodExpiry"] = expiry.into();
    }
    value.to_string()
}

/// Parses a grant from a success body.
pub fn grant_from(json: &str) -> LicenseGrant {
    LicenseGrant::from_envelope(&Envelope::parse(json.as_bytes()).unwrap()).unwrap()
}

/// A grant synced at `t0()` with a three-day grace window.
pub fn standard_grant() -> LicenseGrant {
    let synced = t0().timestamp();
    grant_from(&success_json("act-1", synced, Some(synced + 3 * 86_400)))
}

pub fn ctx() -> RequestContext {
    RequestContext {
        fingerprint: "fp-device".into(),
        nonce: "nonce-1".into(),
        client_version: "1.0.0".into(),
    }
}

/// A machine with product `p1` and key `AAAA-BBBB` entered.
pub fn keyed_machine() -> ActivationMachine {
    let mut machine = ActivationMachine::new(GenuinePolicy::default());
    machine.set_product_id("p1", 0).unwrap();
    machine.set_license_key("AAAA-BBBB").unwrap();
    machine
}

/// A machine activated at `t0()` with [`standard_grant`].
pub fn activated_machine() -> ActivationMachine {
    let mut machine = keyed_machine();
    let request = machine.begin_activation(ctx()).unwrap();
    assert!(machine.complete_activation(request.attempt, Ok(standard_grant()), t0()));
    machine
}
