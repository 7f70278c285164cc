//! Liveness supervisor: periodically evicts clients that haven't sent
//! anything (including a `PING`) within the configured timeout.
//!
//! Grounded on the reference implementation's `cleanup_connections` loop;
//! here eviction asks the owning connection task to close (via its `Notify`
//! handle) rather than closing the socket directly, so cleanup and the
//! disconnect broadcast stay in the one place that already does them.

use std::time::Duration;

use tracing::warn;

use crate::state::SharedRegistry;

pub async fn run(
    registry: SharedRegistry,
    ping_interval: Duration,
    ping_timeout: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(ping_interval);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let stale = registry.read().await.stale_clients(ping_timeout, std::time::Instant::now());
                for client_id in stale {
                    let kick = registry.read().await.kick_handle(client_id);
                    if let Some(kick) = kick {
                        warn!(client_id, "ping timeout, disconnecting client");
                        kick.notify_one();
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
