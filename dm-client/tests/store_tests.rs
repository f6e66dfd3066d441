mod common;

use common::{standard_success, t0};
use dm_client::{
    ActivationState, EnvConfig, FileStore, LicenseClient, LicenseError, MemoryStore,
    PersistentStore, STORE_FILE_NAME, StoreResult, StoredState, mock::MockTransport,
};
use dm_license::{ManualClock, StaticFingerprint};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn file_client(transport: &MockTransport, dir: &Path) -> LicenseClient {
    let client = LicenseClient::builder(Arc::new(transport.clone()))
        .fingerprint(Arc::new(StaticFingerprint("fp-test".into())))
        .clock(Arc::new(ManualClock::new(t0())))
        .env(EnvConfig::default())
        .build();
    client.set_product_id("p1", 0).unwrap();
    client.set_data_directory(dir).unwrap();
    client
}

#[test]
fn file_store_round_trip_and_clear() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileStore::new(tmp.path().join("nested"));
    assert_eq!(store.load().unwrap(), None);

    store.save(b"{}").unwrap();
    assert_eq!(store.load().unwrap(), Some(b"{}".to_vec()));
    assert!(store.path().ends_with(STORE_FILE_NAME));

    store.clear().unwrap();
    store.clear().unwrap();
    assert_eq!(store.load().unwrap(), None);
}

#[test]
fn empty_state_clears_the_store() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileStore::new(tmp.path());
    store.save(b"stale").unwrap();

    StoredState::default().save_to(&store).unwrap();
    assert!(!store.path().exists());
}

#[test]
fn corrupt_store_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileStore::new(tmp.path());
    store.save(b"not json").unwrap();
    assert!(StoredState::load_from(&store).is_err());
}

#[tokio::test]
async fn activation_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();

    let first = file_client(&transport, tmp.path());
    first.set_license_key("AAAA-BBBB").unwrap();
    transport.push_json(200, standard_success());
    assert!(first.activate_license().await);
    assert!(tmp.path().join(STORE_FILE_NAME).exists());
    drop(first);

    let second = file_client(&transport, tmp.path());
    assert!(second.restore_activation().unwrap());
    assert_eq!(second.activation_state(), ActivationState::Activated);
    assert_eq!(second.get_activation_id().unwrap(), "act-1");
    assert_eq!(second.get_license_key().unwrap(), "AAAA-BBBB");
    assert!(second.is_license_valid());
}

#[tokio::test]
async fn restore_with_nothing_stored_is_false() {
    let tmp = tempfile::tempdir().unwrap();
    let client = file_client(&MockTransport::new(), tmp.path());
    assert!(!client.restore_activation().unwrap());
    assert_eq!(client.activation_state(), ActivationState::Unconfigured);
}

#[tokio::test]
async fn restore_rejects_another_product() {
    let tmp = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    let first = file_client(&transport, tmp.path());
    first.set_license_key("AAAA-BBBB").unwrap();
    transport.push_json(200, standard_success());
    assert!(first.activate_license().await);

    let other = LicenseClient::builder(Arc::new(transport.clone()))
        .env(EnvConfig::default())
        .build();
    other.set_product_id("p2", 0).unwrap();
    other.set_data_directory(tmp.path()).unwrap();
    assert!(matches!(
        other.restore_activation(),
        Err(LicenseError::InvalidArgument(_))
    ));
    assert_eq!(other.activation_state(), ActivationState::Unconfigured);
}

#[tokio::test]
async fn reset_removes_the_file() {
    let tmp = tempfile::tempdir().unwrap();
    let transport = MockTransport::new();
    let client = file_client(&transport, tmp.path());
    client.set_license_key("AAAA-BBBB").unwrap();
    transport.push_json(200, standard_success());
    assert!(client.activate_license().await);

    client.reset();
    assert!(!tmp.path().join(STORE_FILE_NAME).exists());

    let again = file_client(&transport, tmp.path());
    assert!(!again.restore_activation().unwrap());
}

#[tokio::test]
async fn unreadable_store_restores_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join(STORE_FILE_NAME), b"{broken").unwrap();

    let client = file_client(&MockTransport::new(), tmp.path());
    assert!(!client.restore_activation().unwrap());
    assert!(client.get_post_update_info().is_none());
}

/// Holds every save until the test releases it.
struct GatedStore {
    inner: MemoryStore,
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl PersistentStore for GatedStore {
    fn load(&self) -> StoreResult<Option<Vec<u8>>> {
        self.inner.load()
    }

    fn save(&self, bytes: &[u8]) -> StoreResult<()> {
        let _ = self.started.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        self.inner.save(bytes)
    }

    fn clear(&self) -> StoreResult<()> {
        self.inner.clear()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn state_is_readable_while_a_save_is_in_progress() {
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let store = Arc::new(GatedStore {
        inner: MemoryStore::new(),
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
    });
    let transport = MockTransport::new();
    transport.push_json(200, standard_success());
    let client = Arc::new(
        LicenseClient::builder(Arc::new(transport))
            .fingerprint(Arc::new(StaticFingerprint("fp-test".into())))
            .clock(Arc::new(ManualClock::new(t0())))
            .store(store.clone())
            .env(EnvConfig::default())
            .build(),
    );
    client.set_product_id("p1", 0).unwrap();
    client.set_license_key("AAAA-BBBB").unwrap();

    let activating = client.clone();
    let activation = tokio::spawn(async move { activating.activate_license().await });

    let reader = client.clone();
    let observed = tokio::task::spawn_blocking(move || {
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(reader.activation_state());
        });
        rx.recv_timeout(Duration::from_secs(1))
    })
    .await
    .unwrap();
    release_tx.send(()).unwrap();

    assert_eq!(observed, Ok(ActivationState::Activated));
    assert!(activation.await.unwrap());
    let stored = StoredState::load_from(&store.inner).unwrap();
    assert!(stored.license.is_some());
}
