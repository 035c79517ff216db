// src/core/tasks/deferred.rs

//! Fire-and-forget work that must finish after the response has been sent.

use futures::future::BoxFuture;
use std::fmt::Debug;
use tokio_util::task::TaskTracker;

/// A unit of deferred work.
pub type DeferredTask = BoxFuture<'static, ()>;

/// Supplied by the host environment. Scheduled tasks run to completion without
/// blocking the caller.
pub trait DeferredTaskContext: Send + Sync + Debug {
    fn schedule(&self, task: DeferredTask);
}

/// Runs deferred tasks on the tokio runtime and tracks them so shutdown (and
/// tests) can wait for every one of them.
#[derive(Debug, Clone, Default)]
pub struct TokioDeferred {
    tracker: TaskTracker,
}

impl TokioDeferred {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks still running.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every task scheduled so far has finished. New tasks may be
    /// scheduled again afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl DeferredTaskContext for TokioDeferred {
    fn schedule(&self, task: DeferredTask) {
        self.tracker.spawn(task);
    }
}
