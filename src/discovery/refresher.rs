//! Background discovery refresh
//!
//! Rebuilds the discovery snapshot on a fixed interval. A cycle that fails
//! leaves the previous snapshot in place and is retried on the next tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time;

use super::DiscoveryCache;

/// Periodic driver for [`DiscoveryCache::refresh`]
pub struct DiscoveryRefresher {
    cache: Arc<DiscoveryCache>,
    interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl DiscoveryRefresher {
    pub fn new(cache: Arc<DiscoveryCache>, interval: Duration) -> Self {
        Self {
            cache,
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Check if the refresh loop is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Spawn the refresh loop.
    ///
    /// The first tick fires one interval from now; the cache already holds
    /// the initial snapshot. Ticks missed while a refresh is running are
    /// skipped rather than queued.
    pub async fn start(&self) {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("DiscoveryRefresher already running");
                return;
            }
            *running = true;
        }

        let cache = self.cache.clone();
        let running = self.running.clone();
        let period = self.interval;

        tokio::spawn(async move {
            tracing::info!(
                interval_secs = period.as_secs_f64(),
                "Starting discovery refresher"
            );

            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;

                if !*running.read().await {
                    tracing::info!("DiscoveryRefresher stopped");
                    break;
                }

                match cache.refresh().await {
                    Ok(Some(snapshot)) => {
                        tracing::debug!(
                            jobs = snapshot.job_count(),
                            endpoints = snapshot.endpoint_count(),
                            "Discovery cycle completed"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            "Discovery refresh failed, keeping last snapshot"
                        );
                    }
                }
            }
        });
    }

    /// Stop the refresh loop after its current tick
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        tracing::info!("Stopping discovery refresher");
    }
}

impl Drop for DiscoveryRefresher {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.try_write() {
            *running = false;
        }
    }
}
