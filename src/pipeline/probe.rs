//! Periodic liveness probe of the dedup store

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

use crate::dedup::DedupStore;

/// Ping the store every `interval` until shutdown, logging health changes
pub fn spawn_probe(
    store: Arc<dyn DedupStore>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let task = async move {
        let mut ticker = time::interval(interval);
        let mut healthy = true;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.ping().await {
                        Ok(()) => {
                            if !healthy {
                                info!("Dedup store reachable again");
                            }
                            debug!("Dedup store: ping ok");
                            healthy = true;
                        }
                        Err(e) => {
                            if healthy {
                                warn!(error = %e, "Dedup store ping failed");
                            } else {
                                debug!(error = %e, "Dedup store still unreachable");
                            }
                            healthy = false;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Dedup probe stopping");
                        break;
                    }
                }
            }
        }
    };

    tokio::spawn(task.with_current_subscriber())
}
