//! Periodic background validation.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::client::LicenseClient;

/// Runs [`LicenseClient::run_background_check`] every `interval`.
///
/// The first check runs immediately. Abort the returned handle to stop.
pub fn spawn_periodic_validation(client: Arc<LicenseClient>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let status = client.run_background_check().await;
            debug!(
                "Background check: genuine={} valid={}",
                status.genuine, status.valid
            );
        }
    })
}
