//! Background task that purges expired handshakes and sessions.

use crate::session::orchestrator::PqcProtocol;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Periodically purge expired handshakes and sessions.
///
/// Expiry is already enforced on access; this only bounds memory held by
/// entries nobody comes back for.
pub fn spawn_sweeper(protocol: Arc<PqcProtocol>, period: Duration) -> JoinHandle<()> {
    info!("Expiry sweeper running every {:?}", period);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            if let Err(e) = protocol.sweep().await {
                error!("Expiry sweep failed: {}. Retrying in {:?}...", e, period);
            }
        }
    })
}
