//! Background eviction task.
//!
//! The sweep itself runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use super::ResourceCache;

/// Sweep `cache` every `interval`, and immediately whenever a `put` crosses a ceiling.
pub fn spawn(cache: Arc<ResourceCache>, interval: Duration, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Cache sweeper starting");

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately; there is nothing to sweep yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cache.pressure().notified() => {
                    // A sweep that just finished may already have made room.
                    if !cache.over_ceiling() {
                        continue;
                    }
                    tracing::debug!("Cache over ceiling; sweeping early");
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }

            // Sweeps sort every entry; keep them off the runtime's I/O threads.
            let cache = Arc::clone(&cache);
            if let Err(e) = tokio::task::spawn_blocking(move || cache.sweep()).await {
                tracing::error!(error = %e, "Cache sweep failed");
            }
        }
    })
}
