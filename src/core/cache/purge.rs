// src/core/cache/purge.rs

//! Tag- and path-pattern purges.
//!
//! A purge whose index lookup is complete and small is executed as a direct
//! lookup: fetch the candidate keys' metadata, delete the ones that still
//! match, clean the index. Everything else
//! runs as a list-and-filter scan over the cache prefix, inspecting each entry's
//! metadata. Deletions are grouped into batches; keys within a batch are deleted
//! concurrently and batches run one after another. A single key failing never
//! aborts the purge.

use crate::config::PurgeConfig;
use crate::core::cache::guarded::GuardedStore;
use crate::core::cache::index::{IndexLookup, IndexStrategy};
use crate::core::cache::key::CacheKey;
use crate::core::cache::metadata::ArtifactMetadata;
use crate::core::cache::pattern::PathPattern;
use crate::core::errors::PixelCacheError;
use crate::core::metrics;
use crate::core::tasks::deferred::DeferredTaskContext;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The result of a purge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PurgeOutcome {
    /// Actual deletions, or the estimate when `deferred` is true.
    pub count: usize,
    /// Keys that could not be deleted. Always 0 for deferred purges.
    pub failed: usize,
    /// True if the purge is still running in the background.
    pub deferred: bool,
}

/// What a purge removes.
#[derive(Debug, Clone)]
pub enum PurgeTarget {
    Tag(String),
    Path(PathPattern),
}

impl PurgeTarget {
    fn kind(&self) -> &'static str {
        match self {
            PurgeTarget::Tag(_) => "tag",
            PurgeTarget::Path(_) => "path",
        }
    }

    fn describe(&self) -> &str {
        match self {
            PurgeTarget::Tag(tag) => tag,
            PurgeTarget::Path(pattern) => pattern.as_str(),
        }
    }

    pub fn matches(&self, metadata: &ArtifactMetadata) -> bool {
        match self {
            PurgeTarget::Tag(tag) => metadata.tags.contains(tag),
            PurgeTarget::Path(pattern) => pattern.matches_metadata(metadata),
        }
    }
}

#[derive(Debug, Default)]
struct BatchResult {
    deleted: Vec<(String, ArtifactMetadata)>,
    failed: usize,
}

#[derive(Debug, Clone)]
pub struct PurgeEngine {
    store: GuardedStore,
    index: Arc<dyn IndexStrategy>,
    scan_prefix: String,
    page_size: usize,
    config: PurgeConfig,
}

impl PurgeEngine {
    pub fn new(
        store: GuardedStore,
        index: Arc<dyn IndexStrategy>,
        scan_prefix: String,
        page_size: usize,
        config: PurgeConfig,
    ) -> Self {
        Self {
            store,
            index,
            scan_prefix,
            page_size,
            config,
        }
    }

    pub async fn purge_by_tag(
        &self,
        tag: &str,
        ctx: Option<&dyn DeferredTaskContext>,
    ) -> Result<PurgeOutcome, PixelCacheError> {
        if tag.trim().is_empty() {
            return Err(PixelCacheError::InvalidRequest(
                "tag cannot be empty".to_string(),
            ));
        }
        self.purge(PurgeTarget::Tag(tag.to_string()), ctx).await
    }

    pub async fn purge_by_path(
        &self,
        pattern: &str,
        ctx: Option<&dyn DeferredTaskContext>,
    ) -> Result<PurgeOutcome, PixelCacheError> {
        let pattern = PathPattern::compile(pattern)?;
        self.purge(PurgeTarget::Path(pattern), ctx).await
    }

    async fn purge(
        &self,
        target: PurgeTarget,
        ctx: Option<&dyn DeferredTaskContext>,
    ) -> Result<PurgeOutcome, PixelCacheError> {
        let lookup = match &target {
            PurgeTarget::Tag(tag) => self.index.keys_for_tag(tag).await?,
            PurgeTarget::Path(pattern) => self.index.keys_for_path(pattern).await?,
        };
        let estimate = lookup.estimated_total;

        match ctx {
            Some(ctx) => {
                let engine = self.clone();
                ctx.schedule(Box::pin(async move {
                    let kind = target.kind();
                    let what = target.describe().to_string();
                    match engine.execute(target, lookup).await {
                        Ok(outcome) => info!(
                            kind,
                            target = %what,
                            count = outcome.count,
                            failed = outcome.failed,
                            "Background purge finished."
                        ),
                        Err(e) => warn!(kind, target = %what, "Background purge failed: {}", e),
                    }
                }));
                Ok(PurgeOutcome {
                    count: estimate,
                    failed: 0,
                    deferred: true,
                })
            }
            None => self.execute(target, lookup).await,
        }
    }

    /// Runs a purge to completion and reports the actual count.
    pub async fn execute(
        &self,
        target: PurgeTarget,
        lookup: IndexLookup,
    ) -> Result<PurgeOutcome, PixelCacheError> {
        let use_direct =
            lookup.complete && lookup.estimated_total < self.config.small_purge_threshold;

        let mut seen: HashSet<String> = HashSet::new();
        let mut outcome = PurgeOutcome::default();

        // Direct lookup, also used to act on sampled markers before scanning.
        if use_direct || (!lookup.complete && !lookup.keys.is_empty()) {
            let candidates = self.resolve_candidates(&target, &lookup, &mut outcome).await;
            seen.extend(candidates.iter().map(|(key, _)| key.clone()));
            let result = self.delete_in_batches(candidates).await;
            self.forget_deleted(&result.deleted).await;
            outcome.count += result.deleted.len();
            outcome.failed += result.failed;
        }

        if !use_direct {
            debug!(
                kind = target.kind(),
                target = target.describe(),
                estimate = lookup.estimated_total,
                "Purging by list-and-filter scan."
            );
            let result = self.scan_and_delete(&target, &seen).await?;
            outcome.count += result.deleted.len();
            outcome.failed += result.failed;
        }

        let cleanup = match &target {
            PurgeTarget::Tag(tag) => self.index.drop_tag(tag).await,
            PurgeTarget::Path(pattern) => self.index.drop_paths(pattern).await,
        };
        if let Err(e) = cleanup {
            warn!(
                kind = target.kind(),
                target = target.describe(),
                "Index cleanup after purge failed: {}", e
            );
        }

        metrics::PURGED_KEYS_TOTAL
            .with_label_values(&[target.kind()])
            .inc_by(outcome.count as f64);
        info!(
            kind = target.kind(),
            target = target.describe(),
            count = outcome.count,
            failed = outcome.failed,
            "Purge complete."
        );
        Ok(outcome)
    }

    /// Loads metadata for the looked-up keys, keeping those that still match.
    async fn resolve_candidates(
        &self,
        target: &PurgeTarget,
        lookup: &IndexLookup,
        outcome: &mut PurgeOutcome,
    ) -> Vec<(String, ArtifactMetadata)> {
        let reads = join_all(lookup.keys.iter().map(|key| self.store.get_metadata(key))).await;
        let mut candidates = Vec::with_capacity(reads.len());
        for (key, read) in lookup.keys.iter().zip(reads) {
            match read {
                // The path index cannot tell transformations apart, and tag sets
                // can hold references from an entry's previous write.
                Ok(Some(metadata)) if target.matches(&metadata) => {
                    candidates.push((key.clone(), metadata));
                }
                Ok(Some(_)) => {
                    debug!(key = %key, target = target.describe(), "Skipping stale index reference.");
                }
                // Already gone: a stale index reference.
                Ok(None) => {}
                Err(e) => {
                    let err = PixelCacheError::PurgeKeyFailure {
                        key: key.clone(),
                        reason: e.to_string(),
                    };
                    warn!("{}", err);
                    metrics::PURGE_KEY_FAILURES_TOTAL.inc();
                    outcome.failed += 1;
                }
            }
        }
        candidates
    }

    async fn scan_and_delete(
        &self,
        target: &PurgeTarget,
        already_handled: &HashSet<String>,
    ) -> Result<BatchResult, PixelCacheError> {
        let mut total = BatchResult::default();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .store
                .list(&self.scan_prefix, cursor.as_deref(), self.page_size)
                .await?;
            let matches: Vec<(String, ArtifactMetadata)> = page
                .entries
                .into_iter()
                .filter(|entry| !already_handled.contains(&entry.key))
                .filter_map(|entry| {
                    let metadata = entry.metadata?;
                    target.matches(&metadata).then_some((entry.key, metadata))
                })
                .collect();

            if !matches.is_empty() {
                let result = self.delete_in_batches(matches).await;
                total.failed += result.failed;
                total.deleted.extend(result.deleted);
            }

            if page.list_complete || page.cursor.is_none() {
                break;
            }
            cursor = page.cursor;
        }
        Ok(total)
    }

    async fn delete_in_batches(&self, items: Vec<(String, ArtifactMetadata)>) -> BatchResult {
        let mut result = BatchResult::default();
        let delay = Duration::from_millis(self.config.batch_delay_ms);

        for (i, batch) in items.chunks(self.config.batch_size.max(1)).enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let deletions = join_all(batch.iter().map(|(key, _)| self.store.delete(key))).await;
            for ((key, metadata), deletion) in batch.iter().zip(deletions) {
                match deletion {
                    Ok(()) => result.deleted.push((key.clone(), metadata.clone())),
                    Err(e) => {
                        let err = PixelCacheError::PurgeKeyFailure {
                            key: key.clone(),
                            reason: e.to_string(),
                        };
                        warn!("{}", err);
                        metrics::PURGE_KEY_FAILURES_TOTAL.inc();
                        result.failed += 1;
                    }
                }
            }
        }
        result
    }

    async fn forget_deleted(&self, deleted: &[(String, ArtifactMetadata)]) {
        for (key, metadata) in deleted {
            let key = CacheKey::from_raw(key.as_str());
            if let Err(e) = self.index.forget(&key, Some(metadata)).await {
                warn!(key = %key, "Failed to remove index references: {}", e);
            }
        }
    }
}
