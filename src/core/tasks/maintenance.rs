// src/core/tasks/maintenance.rs

use crate::config::MaintenanceConfig;
use crate::core::cache::engine::{CacheEngine, MaintenanceOutcome};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

/// Periodically sweeps expired entries and dangling index references.
pub struct MaintenanceTask {
    engine: CacheEngine,
    interval: Duration,
    max_entries: usize,
}

impl MaintenanceTask {
    pub fn new(engine: CacheEngine, config: &MaintenanceConfig) -> Self {
        Self {
            engine,
            interval: config.interval,
            max_entries: config.max_entries,
        }
    }

    /// The main run loop. The first sweep happens one interval after startup.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            interval = ?self.interval,
            max_entries = self.max_entries,
            "Maintenance task started."
        );
        let mut interval =
            tokio::time::interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let MaintenanceOutcome::Completed(report) =
                        self.engine.perform_maintenance(self.max_entries, None).await
                        && report.stopped_early
                    {
                        warn!(
                            scanned = report.scanned,
                            expired = report.expired,
                            "Maintenance sweep stopped early; continuing next cycle."
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Maintenance task shutting down.");
                    return;
                }
            }
        }
    }
}
