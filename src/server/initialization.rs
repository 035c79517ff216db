// src/server/initialization.rs

//! Builds the store, the cache engine, the origin provider and the listener.

use super::context::{AppState, LogReloadHandle, ServerContext};
use crate::config::Config;
use crate::core::cache::CacheEngine;
use crate::core::clock::system_clock;
use crate::core::origin::HttpOriginProvider;
use crate::core::service::ImageService;
use crate::core::store::{KeyValueStore, MemoryStore};
use crate::core::tasks::deferred::{DeferredTaskContext, TokioDeferred};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all server components before the tasks are spawned.
pub async fn setup(config: Config, log_reload_handle: LogReloadHandle) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let clock = system_clock();
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new(clock.clone()));

    let swr_enabled = config.cache.stale_while_revalidate_seconds > 0;
    let (revalidation_tx, revalidation_rx) = if swr_enabled {
        let (tx, rx) = mpsc::channel(config.cache.revalidation_queue_size.max(1));
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let engine = CacheEngine::new(&config, store, clock, revalidation_tx);
    let origin = HttpOriginProvider::new(&config.origin, config.cache.ignored_params.clone())
        .context("Failed to build the origin HTTP client")?;
    let deferred = TokioDeferred::new();
    let deferred_ctx: Arc<dyn DeferredTaskContext> = Arc::new(deferred.clone());
    let service = ImageService::new(engine, Arc::new(origin), Some(deferred_ctx));
    info!("Cache engine initialized.");

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?;
    info!("PixelCache listening on http://{}:{}", config.host, config.port);

    Ok(ServerContext {
        app: AppState {
            service,
            deferred,
            config: Arc::new(config),
            log_reload_handle: Some(log_reload_handle),
        },
        listener: Some(listener),
        revalidation_rx,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

fn log_startup_info(config: &Config) {
    info!(
        prefix = %config.cache.prefix,
        strategy = ?config.cache.index_strategy,
        origin = %config.origin.base_url,
        "Starting PixelCache v{}.",
        env!("CARGO_PKG_VERSION")
    );
    if config.cache.stale_while_revalidate_seconds > 0 {
        info!(
            window_secs = config.cache.stale_while_revalidate_seconds,
            "Stale-while-revalidate is enabled."
        );
    }
    if !config.maintenance.enabled {
        warn!("Maintenance sweeps are disabled; expired entries rely on store-level TTL only.");
    }
}
