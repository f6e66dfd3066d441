//! DistroMate license activation and update client.
//!
//! [`LicenseClient`] is the entry point. It owns the activation and update
//! engines and talks to the outside world through collaborators:
//!
//! - [`Transport`] for the licensing authority and update service
//! - [`PersistentStore`] for the activation snapshot and post-update notice
//! - [`Installer`] for handing packages to the platform installer
//! - [`FingerprintProvider`](dm_license::FingerprintProvider) and
//!   [`Clock`](dm_license::Clock) from `dm-license`
//!
//! # Example
//!
//! ```no_run
//! use dm_client::{LicenseClient, mock::MockTransport};
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let client = LicenseClient::builder(Arc::new(MockTransport::new())).build();
//! client.set_product_id("com.example.app", 0).unwrap();
//! client.set_license_key("AAAA-BBBB-CCCC-DDDD").unwrap();
//! if !client.activate_license().await {
//!     eprintln!("{:?}", client.get_last_activation_error());
//! }
//! # }
//! ```

pub mod callback;
pub mod client;
pub mod dev_license;
pub mod env;
pub mod error;
#[cfg(feature = "online")]
pub mod http;
pub mod installer;
pub mod options;
pub mod periodic;
pub mod store;
pub mod transport;

pub use callback::{LicenseCallback, LicenseStatus, ProgressCallback};
pub use client::{
    DownloadOutcome, LicenseClient, LicenseClientBuilder, UpdateCheck, UpdateEvent, UpdateWait,
    json_to_canonical, library_version,
};
pub use dev_license::{DEV_LICENSE_ERROR, DevLicenseError, should_skip_check};
pub use env::{EnvConfig, default_data_directory};
pub use error::{StoreError, StoreResult, TransportError};
#[cfg(feature = "online")]
pub use http::HttpTransport;
pub use installer::{Installer, ProcessInstaller};
pub use options::{ClientOptions, Endpoints, InstallOptions, UpdateOptions};
pub use periodic::spawn_periodic_validation;
pub use store::{FileStore, MemoryStore, PersistentStore, STORE_FILE_NAME, StoredState};
pub use transport::mock;
pub use transport::{RequestOptions, Transport, TransportResponse};

pub use dm_license::{
    ActivationErrorCode, ActivationFailure, ActivationState, ErrorCategory, ErrorDetail,
    ErrorKind, LicenseError, LicenseResult,
};
pub use dm_update::{DownloadProgress, PostUpdateNotice, QuitAndInstallResult, UpdateInfo, UpdateState};
