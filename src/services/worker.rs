use crate::services::rate_limit::CounterStore;
use crate::services::reaper::sweep_expired_temp;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Periodic maintenance: orphaned temp files and stale rate-limit counters.
pub struct BackgroundWorker {
    temp_dir: PathBuf,
    temp_ttl: Duration,
    interval: Duration,
    counters: Arc<dyn CounterStore>,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        temp_dir: PathBuf,
        temp_ttl: Duration,
        interval: Duration,
        counters: Arc<dyn CounterStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            temp_dir,
            temp_ttl,
            interval,
            counters,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            ttl_secs = self.temp_ttl.as_secs(),
            "Background worker started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("Background worker shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.perform_cleanup().await;
                }
            }
        }
    }

    pub async fn perform_cleanup(&self) {
        tracing::debug!("Running background cleanup tasks");

        match sweep_expired_temp(&self.temp_dir, self.temp_ttl).await {
            Ok(report) if report.removed > 0 || report.failed > 0 => {
                tracing::info!(
                    removed = report.removed,
                    retained = report.retained,
                    failed = report.failed,
                    "Temp sweep completed"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(dir = %self.temp_dir.display(), "Temp sweep failed: {}", e),
        }

        match self.counters.purge_expired().await {
            Ok(n) if n > 0 => tracing::debug!(purged = n, "Expired rate-limit counters purged"),
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to purge rate-limit counters: {}", e),
        }
    }
}
