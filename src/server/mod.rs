// src/server/mod.rs

use crate::config::Config;
use anyhow::{Result, anyhow};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

mod context;
pub mod http;
mod initialization;
mod spawner;

pub use context::{AppState, LogReloadHandle};

/// How long shutdown waits for tasks and deferred work before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config, log_reload_handle: LogReloadHandle) -> Result<()> {
    // 1. Build the engine, the origin client and the listener.
    let mut ctx = initialization::setup(config, log_reload_handle).await?;

    // 2. Spawn the HTTP server and all background tasks.
    spawner::spawn_all(&mut ctx)?;

    // 3. Wait for a signal or a failing task.
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("Failed to register SIGINT handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to register SIGTERM handler: {}", e))?;

    let mut failure = None;
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
        Some(res) = ctx.background_tasks.join_next() => match res {
            Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
            Ok(Err(e)) => {
                error!("CRITICAL: Background task failed: {}. Shutting down.", e);
                failure = Some(e);
            }
            Err(e) => {
                error!("CRITICAL: Background task panicked: {e:?}. Shutting down.");
                failure = Some(anyhow!("background task panicked: {e}"));
            }
        },
    }

    // 4. Stop everything and let deferred writes and purges finish.
    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No task was listening for the shutdown signal.");
    }

    let background_tasks = &mut ctx.background_tasks;
    let drain = async {
        while background_tasks.join_next().await.is_some() {}
        ctx.app.deferred.drain().await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(
            pending = ctx.app.deferred.pending(),
            "Shutdown grace period elapsed; abandoning remaining work."
        );
    }
    info!("Shutdown complete.");

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
