use std::sync::Arc;
use std::time::Duration;

use tokio::time;

use super::status::StatusSource;
use crate::store::TraceStore;
use crate::supervisor::{ShutdownSignal, TaskResult};

/// Periodically evicts traces whose workers are gone or idle
pub struct HungReaper<S> {
    store: Arc<TraceStore>,
    source: S,
    interval: Duration,
    stale_after: Duration,
}

impl<S: StatusSource> HungReaper<S> {
    pub fn new(store: Arc<TraceStore>, source: S, interval: Duration, stale_after: Duration) -> Self {
        Self {
            store,
            source,
            interval,
            stale_after,
        }
    }

    /// Fetch worker states once and sweep the store
    ///
    /// A failed fetch skips the sweep; the next cycle tries again.
    pub async fn run_once(&self) -> usize {
        let statuses = match self.source.fetch().await {
            Ok(statuses) => statuses,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to load worker status");
                return 0;
            }
        };

        let reaped = self
            .store
            .reap_hung(&statuses, self.stale_after, chrono::Utc::now());
        if reaped > 0 {
            tracing::info!("Hung reaper dropped {} traces", reaped);
        }
        reaped
    }

    /// Sweep on every interval tick until shutdown
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) -> TaskResult {
        tracing::info!(
            "Hung reaper started with interval {:?}, stale after {:?}",
            self.interval,
            self.stale_after
        );

        let mut ticker = time::interval(self.interval);
        // The first tick completes immediately; workers need time to report.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.wait() => break,
            }
        }

        tracing::info!("Hung reaper stopped");
        Ok(())
    }
}
