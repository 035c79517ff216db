// src/server/spawner.rs

//! Spawns all of the server's long-running tasks.

use super::context::ServerContext;
use super::http;
use crate::core::tasks::maintenance::MaintenanceTask;
use crate::core::tasks::revalidation::RevalidationWorker;
use anyhow::{Result, anyhow};
use tracing::info;

/// Spawns the HTTP server and the background tasks into the context's JoinSet.
pub fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- HTTP front ---
    let listener = ctx
        .listener
        .take()
        .ok_or_else(|| anyhow!("HTTP listener was already taken"))?;
    let router = http::router(ctx.app.clone());
    let shutdown_rx_http = shutdown_tx.subscribe();
    background_tasks.spawn(async move { http::serve(listener, router, shutdown_rx_http).await });

    // --- Maintenance ---
    let maintenance = &ctx.app.config.maintenance;
    if maintenance.enabled {
        let task = MaintenanceTask::new(ctx.app.service.engine().clone(), maintenance);
        let shutdown_rx_maint = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            task.run(shutdown_rx_maint).await;
            Ok(())
        });
    } else {
        info!("Maintenance task is disabled in the configuration.");
    }

    // --- Stale-while-revalidate ---
    if let Some(rx) = ctx.revalidation_rx.take() {
        let worker = RevalidationWorker::new(ctx.app.service.clone(), rx);
        let shutdown_rx_reval = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            worker.run(shutdown_rx_reval).await;
            Ok(())
        });
    }

    info!("All background tasks have been spawned.");
    Ok(())
}
