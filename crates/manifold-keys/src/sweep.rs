use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::pool::KeyPool;

/// Spawn the quarantine sweep loop. Every `interval` the pool's expired
/// quarantine entries are returned to rotation. Does nothing when
/// quarantine is disabled. Stops when `cancel` fires.
pub fn spawn_sweep(
    pool: Arc<KeyPool>,
    interval: Duration,
    cancel: CancellationToken,
) -> Option<tokio::task::JoinHandle<()>> {
    if !pool.quarantine_enabled() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the immediate first tick would sweep an empty pool
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("quarantine sweep stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let restored = pool.sweep_expired(Instant::now());
                    if restored > 0 {
                        debug!(restored, "quarantine sweep restored credentials");
                    }
                }
            }
        }
    }))
}
