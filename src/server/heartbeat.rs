//! Liveness monitor for connected clients

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::ClientRegistry;

/// Periodically force-close clients that stopped answering pings
///
/// Runs every `interval` until `shutdown` is cancelled.
pub fn spawn_liveness_monitor(
    registry: Arc<ClientRegistry>,
    interval: Duration,
    client_timeout: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let dead = registry.unresponsive(client_timeout);
                    if !dead.is_empty() {
                        log::info!("Closing {} unresponsive client(s)", dead.len());
                    }
                    for client_id in dead {
                        log::debug!("Client {} missed its heartbeat", client_id);
                        registry.close(&client_id);
                    }
                }
            }
        }
    })
}
