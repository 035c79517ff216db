// src/server/context.rs

use crate::config::Config;
use crate::core::service::ImageService;
use crate::core::tasks::deferred::TokioDeferred;
use crate::core::tasks::revalidation::RevalidationJob;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing_subscriber::{Registry, filter::EnvFilter, reload};

pub type LogReloadHandle = Arc<reload::Handle<EnvFilter, Registry>>;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub service: ImageService,
    pub deferred: TokioDeferred,
    pub config: Arc<Config>,
    pub log_reload_handle: Option<LogReloadHandle>,
}

/// Holds all the initialized state required to run the server.
pub struct ServerContext {
    pub app: AppState,
    /// Taken by the spawner when the HTTP task starts.
    pub listener: Option<TcpListener>,
    /// Present only when stale-while-revalidate is enabled.
    pub revalidation_rx: Option<mpsc::Receiver<RevalidationJob>>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}
