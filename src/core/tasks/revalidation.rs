// src/core/tasks/revalidation.rs

//! Background revalidation for stale-while-revalidate reads.

use crate::core::cache::key::{CacheKey, TransformParams};
use crate::core::service::ImageService;
use dashmap::DashSet;
use indexmap::IndexSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// A request to refresh one stale artifact.
#[derive(Debug, Clone)]
pub struct RevalidationJob {
    pub key: CacheKey,
    pub source_path: String,
    pub params: TransformParams,
    /// Tags of the stale entry, carried over to the refreshed one.
    pub tags: IndexSet<String>,
}

/// Consumes revalidation jobs. Jobs for a key that is already being refreshed
/// are dropped.
pub struct RevalidationWorker {
    service: ImageService,
    rx: mpsc::Receiver<RevalidationJob>,
    in_flight: Arc<DashSet<CacheKey>>,
}

impl RevalidationWorker {
    pub fn new(service: ImageService, rx: mpsc::Receiver<RevalidationJob>) -> Self {
        Self {
            service,
            rx,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    /// Runs the main loop for the revalidation worker.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Revalidation worker task started.");
        loop {
            tokio::select! {
                job = self.rx.recv() => match job {
                    Some(job) => self.dispatch(job),
                    None => {
                        info!("Revalidation queue closed; worker exiting.");
                        return;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!("Revalidation worker shutting down.");
                    return;
                }
            }
        }
    }

    fn dispatch(&self, job: RevalidationJob) {
        if !self.in_flight.insert(job.key.clone()) {
            debug!(key = %job.key, "Revalidation already in flight; skipping.");
            return;
        }
        let service = self.service.clone();
        let in_flight = self.in_flight.clone();
        // Each job runs on its own task so slow origins do not stall the queue.
        tokio::spawn(async move {
            if let Err(e) = service.revalidate(&job).await {
                warn!(key = %job.key, "Background revalidation failed: {}", e);
            }
            in_flight.remove(&job.key);
        });
    }
}
