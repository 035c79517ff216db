// src/core/service.rs

//! The request flow behind the image route: consult the cache, fall back to the
//! origin transform on a miss, then store the result off the critical path.

use crate::core::cache::engine::{CacheEngine, PutOptions, WriteStatus};
use crate::core::cache::key::{CacheKey, TransformParams};
use crate::core::errors::PixelCacheError;
use crate::core::metrics;
use crate::core::origin::{OriginTransformProvider, TransformedImage};
use crate::core::tasks::deferred::DeferredTaskContext;
use crate::core::tasks::revalidation::RevalidationJob;
use bytes::Bytes;
use indexmap::IndexSet;
use std::sync::Arc;
use tracing::debug;

/// A fully resolved image response.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResponse {
    pub key: CacheKey,
    pub status: u16,
    pub body: Bytes,
    pub content_type: String,
    /// `X-Cache` value: `HIT`, `STALE`, `MISS` or `BYPASS`.
    pub cache_status: &'static str,
    /// Seconds for `Cache-Control: public, max-age=...`.
    pub max_age: u64,
}

#[derive(Debug, Clone)]
pub struct ImageService {
    engine: CacheEngine,
    origin: Arc<dyn OriginTransformProvider>,
    deferred: Option<Arc<dyn DeferredTaskContext>>,
}

impl ImageService {
    pub fn new(
        engine: CacheEngine,
        origin: Arc<dyn OriginTransformProvider>,
        deferred: Option<Arc<dyn DeferredTaskContext>>,
    ) -> Self {
        Self {
            engine,
            origin,
            deferred,
        }
    }

    pub fn engine(&self) -> &CacheEngine {
        &self.engine
    }

    pub fn deferred(&self) -> Option<&dyn DeferredTaskContext> {
        self.deferred.as_deref()
    }

    /// Serves `path` transformed by the parameters in `query`.
    ///
    /// Only origin failures surface as errors. Cache problems degrade to a
    /// miss or a bypass.
    pub async fn handle(
        &self,
        path: &str,
        query: Option<&str>,
        extra_tags: &IndexSet<String>,
    ) -> Result<ImageResponse, PixelCacheError> {
        let params = TransformParams::from_query(query.unwrap_or_default());
        let lookup = self.engine.get(path, &params).await;
        let cache_status = lookup.cache_status();

        if let Some(artifact) = lookup.into_artifact() {
            let max_age = artifact.remaining_ttl_secs(self.engine.clock().now_ms());
            return Ok(ImageResponse {
                content_type: artifact.metadata.content_type,
                key: artifact.key,
                status: 200,
                body: artifact.body,
                cache_status,
                max_age,
            });
        }

        let image = self.transform(path, &params).await?;
        let outcome = self
            .engine
            .put(
                path,
                &params,
                image.body.clone(),
                &image.content_type,
                extra_tags,
                put_options(&image),
                self.deferred(),
            )
            .await;
        debug!(key = %outcome.key, ttl = outcome.ttl.seconds, rule = %outcome.ttl.rule, status = ?outcome.status, "Served from origin.");

        let max_age = match outcome.status {
            WriteStatus::Skipped => 0,
            _ => outcome.ttl.seconds,
        };
        Ok(ImageResponse {
            key: outcome.key,
            status: image.status,
            body: image.body,
            content_type: image.content_type,
            cache_status,
            max_age,
        })
    }

    /// Runs the origin transform through its circuit breaker.
    pub async fn transform(
        &self,
        path: &str,
        params: &TransformParams,
    ) -> Result<TransformedImage, PixelCacheError> {
        metrics::ORIGIN_TRANSFORMS_TOTAL.inc();
        let _timer = metrics::ORIGIN_TRANSFORM_LATENCY_SECONDS.start_timer();
        self.engine
            .resilience()
            .origin
            .call("transform", || self.origin.transform(path, params))
            .await
    }

    /// Re-runs the transform for a stale entry and rewrites it inline.
    pub async fn revalidate(&self, job: &RevalidationJob) -> Result<(), PixelCacheError> {
        let image = self.transform(&job.source_path, &job.params).await?;
        let outcome = self
            .engine
            .put(
                &job.source_path,
                &job.params,
                image.body.clone(),
                &image.content_type,
                &job.tags,
                put_options(&image),
                None,
            )
            .await;
        self.engine.counters().record_revalidation();
        debug!(key = %outcome.key, status = ?outcome.status, "Revalidated stale entry.");
        Ok(())
    }
}

fn put_options(image: &TransformedImage) -> PutOptions {
    PutOptions {
        status: image.status,
        origin_ttl_hint: image.ttl_hint,
        no_store: image.no_store,
        original_size: image.original_size,
        source_type: image.source_type,
    }
}
