// src/core/cache/engine.rs

//! `CacheEngine`: the public surface of the artifact cache. Composes key
//! derivation, TTL policy, indexing, purging, maintenance and the resilience
//! layer behind a handful of calls.
//!
//! Reads degrade to a miss on every cache-layer problem. Writes never fail the
//! caller: they run as deferred tasks when a context is available and are
//! otherwise logged and swallowed.

use crate::config::{CacheConfig, Config, PurgeConfig, TtlConfig};
use crate::core::cache::guarded::GuardedStore;
use crate::core::cache::index::{IndexStrategy, build_index};
use crate::core::cache::key::{CacheKey, KeyCodec, TransformParams};
use crate::core::cache::maintenance::{MaintenanceReport, MaintenanceSweeper};
use crate::core::cache::metadata::{
    ArtifactMetadata, CacheLookup, CachedArtifact, SourceType, is_image_content_type,
};
use crate::core::cache::purge::{PurgeEngine, PurgeOutcome};
use crate::core::cache::stats::{CacheCounters, CacheStats};
use crate::core::cache::ttl::{TtlDecision, TtlInput, TtlPolicy};
use crate::core::clock::SharedClock;
use crate::core::errors::PixelCacheError;
use crate::core::metrics;
use crate::core::resilience::Resilience;
use crate::core::store::KeyValueStore;
use crate::core::tasks::deferred::DeferredTaskContext;
use crate::core::tasks::revalidation::RevalidationJob;
use bytes::Bytes;
use indexmap::IndexSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Provenance and policy inputs for a write, beyond the payload itself.
#[derive(Debug, Clone)]
pub struct PutOptions {
    /// Status the origin answered with. Non-2xx responses get short TTLs.
    pub status: u16,
    /// Upper bound on the TTL announced by the origin.
    pub origin_ttl_hint: Option<u64>,
    /// The origin sent `Cache-Control: no-store`.
    pub no_store: bool,
    pub original_size: Option<i64>,
    pub source_type: SourceType,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            status: 200,
            origin_ttl_hint: None,
            no_store: false,
            original_size: None,
            source_type: SourceType::default(),
        }
    }
}

/// What happened to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Stored before `put` returned.
    Written,
    /// Handed to the deferred task context.
    Deferred,
    /// The store write failed; the failure was logged.
    Failed,
    /// The response may not be cached; nothing was written.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub key: CacheKey,
    pub ttl: TtlDecision,
    pub status: WriteStatus,
}

/// Result of `CacheEngine::perform_maintenance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceOutcome {
    Completed(MaintenanceReport),
    Deferred,
}

#[derive(Debug)]
struct EngineInner {
    config: CacheConfig,
    codec: KeyCodec,
    ttl: TtlPolicy,
    store: GuardedStore,
    index: Arc<dyn IndexStrategy>,
    purge: PurgeEngine,
    sweeper: MaintenanceSweeper,
    counters: CacheCounters,
    clock: SharedClock,
    revalidation_tx: Option<mpsc::Sender<RevalidationJob>>,
}

/// The cache facade. Cheap to clone; all clones share state.
#[derive(Debug, Clone)]
pub struct CacheEngine {
    inner: Arc<EngineInner>,
}

impl CacheEngine {
    /// Builds an engine over `store`. Stale reads enqueue jobs on
    /// `revalidation_tx` when one is given.
    pub fn new(
        config: &Config,
        store: Arc<dyn KeyValueStore>,
        clock: SharedClock,
        revalidation_tx: Option<mpsc::Sender<RevalidationJob>>,
    ) -> Self {
        let resilience = Arc::new(Resilience::new(
            &config.resilience,
            &config.origin,
            clock.clone(),
        ));
        Self::from_parts(
            config.cache.clone(),
            config.ttl.clone(),
            config.purge.clone(),
            GuardedStore::new(store, resilience),
            clock,
            revalidation_tx,
        )
    }

    fn from_parts(
        cache: CacheConfig,
        ttl: TtlConfig,
        purge: PurgeConfig,
        store: GuardedStore,
        clock: SharedClock,
        revalidation_tx: Option<mpsc::Sender<RevalidationJob>>,
    ) -> Self {
        let codec = KeyCodec::new(cache.prefix.clone(), cache.ignored_params.clone());
        let index = build_index(&cache, store.clone());
        let purge = PurgeEngine::new(
            store.clone(),
            index.clone(),
            codec.scan_prefix(),
            cache.list_page_size,
            purge,
        );
        let sweeper = MaintenanceSweeper::new(
            store.clone(),
            index.clone(),
            clock.clone(),
            codec.scan_prefix(),
            cache.list_page_size,
            cache.stale_while_revalidate_seconds,
        );
        Self {
            inner: Arc::new(EngineInner {
                config: cache,
                codec,
                ttl: TtlPolicy::new(ttl),
                store,
                index,
                purge,
                sweeper,
                counters: CacheCounters::default(),
                clock,
                revalidation_tx,
            }),
        }
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.inner.codec
    }

    pub fn ttl_policy(&self) -> &TtlPolicy {
        &self.inner.ttl
    }

    pub fn index(&self) -> &Arc<dyn IndexStrategy> {
        &self.inner.index
    }

    pub fn resilience(&self) -> &Arc<Resilience> {
        self.inner.store.resilience()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }

    pub fn counters(&self) -> &CacheCounters {
        &self.inner.counters
    }

    pub fn key_for(&self, source_path: &str, params: &TransformParams) -> CacheKey {
        self.inner.codec.compute_key(source_path, params, None)
    }

    /// Looks up the artifact for `(source_path, params)`.
    ///
    /// Never fails: store errors, invalid entries and expired entries all come
    /// back as `Miss`, except an unreachable store, which yields `Unavailable`.
    pub async fn get(&self, source_path: &str, params: &TransformParams) -> CacheLookup {
        let key = self.key_for(source_path, params);

        let stored = match self.inner.store.get(key.as_str()).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return self.miss(&key, "absent"),
            Err(e) if e.is_unavailable() => {
                warn!(key = %key, "Cache read bypassed, store unavailable: {}", e);
                self.inner.counters.record_miss();
                metrics::CACHE_MISSES_TOTAL
                    .with_label_values(&["unavailable"])
                    .inc();
                return CacheLookup::Unavailable;
            }
            Err(e) => {
                warn!(key = %key, "Cache read failed: {}", e);
                return self.miss(&key, "invalid");
            }
        };

        let Some(metadata) = stored.metadata else {
            let err = PixelCacheError::InvalidCachedEntry {
                key: key.to_string(),
                reason: "metadata missing".to_string(),
            };
            warn!("{}", err);
            return self.miss(&key, "invalid");
        };
        let owned = metadata
            .validate(&key, &stored.body)
            .and_then(|()| metadata.check_owner(&key, &self.canonical_url(source_path, params)));
        if let Err(e) = owned {
            warn!("{}", e);
            return self.miss(&key, "invalid");
        }

        let now = self.inner.clock.now_ms();
        let artifact = CachedArtifact {
            key: key.clone(),
            body: stored.body,
            metadata,
        };

        if !artifact.metadata.is_expired(now) {
            self.inner.counters.record_hit();
            metrics::CACHE_HITS_TOTAL.with_label_values(&["fresh"]).inc();
            return CacheLookup::Fresh(artifact);
        }

        if artifact
            .metadata
            .is_within_stale_window(now, self.inner.config.stale_while_revalidate_seconds)
        {
            self.inner.counters.record_stale_hit();
            metrics::CACHE_HITS_TOTAL.with_label_values(&["stale"]).inc();
            self.request_revalidation(source_path, params, &artifact);
            return CacheLookup::Stale(artifact);
        }

        self.miss(&key, "expired")
    }

    fn miss(&self, key: &CacheKey, reason: &'static str) -> CacheLookup {
        debug!(key = %key, reason, "Cache miss.");
        self.inner.counters.record_miss();
        metrics::CACHE_MISSES_TOTAL.with_label_values(&[reason]).inc();
        CacheLookup::Miss
    }

    fn request_revalidation(
        &self,
        source_path: &str,
        params: &TransformParams,
        artifact: &CachedArtifact,
    ) {
        let Some(tx) = &self.inner.revalidation_tx else {
            return;
        };
        let job = RevalidationJob {
            key: artifact.key.clone(),
            source_path: source_path.to_string(),
            params: params.clone(),
            tags: artifact.metadata.tags.clone(),
        };
        match tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                debug!(key = %job.key, "Revalidation queue full; dropping job.");
            }
            Err(TrySendError::Closed(job)) => {
                warn!(key = %job.key, "Revalidation worker is gone; dropping job.");
            }
        }
    }

    /// Tags every artifact gets from its own request: the exact path, the
    /// parent directory, the output format and the derivative name.
    pub fn derived_tags(source_path: &str, params: &TransformParams) -> IndexSet<String> {
        let mut tags = IndexSet::new();
        if !source_path.is_empty() {
            tags.insert(format!("path:{source_path}"));
            if let Some((dir, _)) = source_path.rsplit_once('/') {
                let dir = if dir.is_empty() { "/" } else { dir };
                tags.insert(format!("path:{dir}"));
            }
        }
        if let Some(format) = params.format() {
            tags.insert(format!("format:{format}"));
        }
        if let Some(derivative) = params.derivative() {
            tags.insert(format!("derivative:{derivative}"));
        }
        tags
    }

    /// The canonical URL recorded in metadata and matched by path purges.
    pub fn canonical_url(&self, source_path: &str, params: &TransformParams) -> String {
        let query = params.to_query_string(self.inner.codec.ignored_params());
        if query.is_empty() {
            source_path.to_string()
        } else {
            format!("{source_path}?{query}")
        }
    }

    /// Computes a TTL and stores the artifact with its metadata and tags.
    ///
    /// With a deferred context the write is scheduled and `put` returns at once.
    /// Without one, the write runs inline and a failure is logged, never returned.
    #[allow(clippy::too_many_arguments)]
    pub async fn put(
        &self,
        source_path: &str,
        params: &TransformParams,
        body: Bytes,
        content_type: &str,
        tags: &IndexSet<String>,
        options: PutOptions,
        ctx: Option<&dyn DeferredTaskContext>,
    ) -> PutOutcome {
        let key = self.key_for(source_path, params);
        let ttl = self.inner.ttl.decide(&TtlInput {
            status: options.status,
            content_type,
            width: params.width(),
            height: params.height(),
            quality: params.quality(),
            path: source_path,
            derivative: params.derivative(),
            origin_ttl_hint: options.origin_ttl_hint,
        });

        if !is_image_content_type(content_type) {
            debug!(key = %key, content_type, "Not caching non-image payload.");
            return PutOutcome {
                key,
                ttl,
                status: WriteStatus::Skipped,
            };
        }
        // Only successes and client errors are worth remembering.
        let cacheable_status =
            (200..300).contains(&options.status) || (400..500).contains(&options.status);
        if options.no_store || !cacheable_status {
            debug!(key = %key, status = options.status, no_store = options.no_store, "Not caching response.");
            return PutOutcome {
                key,
                ttl,
                status: WriteStatus::Skipped,
            };
        }

        let mut all_tags = Self::derived_tags(source_path, params);
        all_tags.extend(tags.iter().filter(|t| !t.is_empty()).cloned());

        let metadata = ArtifactMetadata::new(
            self.canonical_url(source_path, params),
            self.inner.clock.now_ms(),
            content_type.to_string(),
            body.len() as i64,
            params.clone(),
            all_tags,
            i32::try_from(ttl.seconds).unwrap_or(i32::MAX),
            options.original_size,
            options.source_type,
        );

        let status = match ctx {
            Some(ctx) => {
                let engine = self.clone();
                let key = key.clone();
                ctx.schedule(Box::pin(async move {
                    engine.write_artifact(&key, body, metadata).await;
                }));
                WriteStatus::Deferred
            }
            None => {
                if self.write_artifact(&key, body, metadata).await {
                    WriteStatus::Written
                } else {
                    WriteStatus::Failed
                }
            }
        };

        PutOutcome { key, ttl, status }
    }

    /// Stores the artifact and records its index entries. Returns `false` if the
    /// artifact itself could not be stored. Index failures are logged only.
    async fn write_artifact(&self, key: &CacheKey, body: Bytes, metadata: ArtifactMetadata) -> bool {
        let physical_ttl = metadata.ttl_seconds.max(0) as u64
            + self.inner.config.stale_while_revalidate_seconds;
        let size = body.len() as u64;

        if let Err(e) = self
            .inner
            .store
            .put(key.as_str(), body, Some(metadata.clone()), Some(physical_ttl))
            .await
        {
            warn!(key = %key, "Cache write failed and was dropped: {}", e);
            metrics::CACHE_WRITE_FAILURES_TOTAL.inc();
            return false;
        }
        metrics::CACHE_WRITES_TOTAL.inc();

        if self.inner.index.should_index(key, size) {
            let indexed = async {
                self.inner.index.record_tags(key, &metadata.tags).await?;
                self.inner.index.record_path(key, metadata.path()).await
            };
            if let Err(e) = indexed.await {
                warn!(key = %key, "Failed to update index for cached artifact: {}", e);
            }
        }
        true
    }

    /// Removes a single artifact and its index references.
    pub async fn delete(
        &self,
        source_path: &str,
        params: &TransformParams,
    ) -> Result<(), PixelCacheError> {
        let key = self.key_for(source_path, params);
        let hint = self.inner.store.get_metadata(key.as_str()).await?;
        self.inner.store.delete(key.as_str()).await?;
        if let Some(metadata) = &hint
            && let Err(e) = self.inner.index.forget(&key, Some(metadata)).await
        {
            warn!(key = %key, "Failed to remove index references: {}", e);
        }
        Ok(())
    }

    pub async fn purge_by_tag(
        &self,
        tag: &str,
        ctx: Option<&dyn DeferredTaskContext>,
    ) -> Result<PurgeOutcome, PixelCacheError> {
        self.inner.purge.purge_by_tag(tag, ctx).await
    }

    pub async fn purge_by_path(
        &self,
        pattern: &str,
        ctx: Option<&dyn DeferredTaskContext>,
    ) -> Result<PurgeOutcome, PixelCacheError> {
        let pattern = self.normalize_pattern(pattern);
        self.inner.purge.purge_by_path(&pattern, ctx).await
    }

    /// Rewrites the query of an exact-transformation pattern into the canonical
    /// form stored in metadata, so parameter order does not matter.
    fn normalize_pattern(&self, pattern: &str) -> String {
        match pattern.split_once('?') {
            Some((path, query)) if !query.contains('*') => {
                let params = TransformParams::from_query(query);
                self.canonical_url(path, &params)
            }
            _ => pattern.to_string(),
        }
    }

    /// Runs a maintenance sweep inspecting at most `max_entries` keys.
    pub async fn perform_maintenance(
        &self,
        max_entries: usize,
        ctx: Option<&dyn DeferredTaskContext>,
    ) -> MaintenanceOutcome {
        match ctx {
            Some(ctx) => {
                let engine = self.clone();
                ctx.schedule(Box::pin(async move {
                    engine.run_maintenance(max_entries).await;
                }));
                MaintenanceOutcome::Deferred
            }
            None => MaintenanceOutcome::Completed(self.run_maintenance(max_entries).await),
        }
    }

    async fn run_maintenance(&self, max_entries: usize) -> MaintenanceReport {
        let report = self.inner.sweeper.perform(max_entries).await;
        self.inner
            .counters
            .record_maintenance(self.inner.clock.now_ms());
        report
    }

    /// Scans up to `stats_scan_limit` entries for size totals and combines them
    /// with the process counters and breaker states.
    pub async fn stats(&self) -> Result<CacheStats, PixelCacheError> {
        let prefix = self.inner.codec.scan_prefix();
        let limit = self.inner.config.stats_scan_limit;
        let mut entry_count = 0u64;
        let mut total_bytes = 0u64;
        let mut scanned = 0usize;
        let mut scan_complete = false;
        let mut cursor: Option<String> = None;

        while scanned < limit {
            let page_limit = self.inner.config.list_page_size.min(limit - scanned);
            let page = self
                .inner
                .store
                .list(&prefix, cursor.as_deref(), page_limit)
                .await?;
            scanned += page.entries.len();
            for metadata in page.entries.into_iter().filter_map(|e| e.metadata) {
                entry_count += 1;
                total_bytes += metadata.size.max(0) as u64;
            }
            if page.list_complete || page.cursor.is_none() {
                scan_complete = true;
                break;
            }
            cursor = page.cursor;
        }

        let counters = &self.inner.counters;
        Ok(CacheStats {
            entry_count,
            total_bytes,
            hit_count: counters.hits(),
            miss_count: counters.misses(),
            stale_hit_count: counters.stale_hits(),
            revalidation_count: counters.revalidations(),
            last_maintenance_at: counters.last_maintenance_at(),
            scan_complete,
            breakers: self.resilience().snapshot(),
        })
    }
}
