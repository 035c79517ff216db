// src/core/cache/index/distributed.rs

//! Distributed (sampled) indexing. Each artifact's own metadata is the only
//! authoritative index. Per-tag and per-path marker sets are written for a
//! deterministic sample of keys so purges can act on some keys immediately;
//! the list-and-filter scan guarantees the rest are found.

use super::{IndexLookup, IndexStrategy, add_to_set, read_set};
use crate::config::IndexStrategyKind;
use crate::core::cache::guarded::GuardedStore;
use crate::core::cache::key::{CacheKey, fnv1a32};
use crate::core::cache::metadata::ArtifactMetadata;
use crate::core::cache::pattern::PathPattern;
use crate::core::errors::PixelCacheError;
use async_trait::async_trait;
use indexmap::IndexSet;

#[derive(Debug)]
pub struct DistributedIndex {
    prefix: String,
    small_file_threshold: u64,
    frequency: u32,
    store: GuardedStore,
}

impl DistributedIndex {
    pub fn new(prefix: &str, small_file_threshold: u64, frequency: u32, store: GuardedStore) -> Self {
        Self {
            prefix: prefix.to_string(),
            small_file_threshold,
            frequency: frequency.max(1),
            store,
        }
    }

    pub fn tag_marker_key(&self, tag: &str) -> String {
        format!("{}:marker:tag:{}", self.prefix, tag)
    }

    pub fn path_marker_key(&self, path: &str) -> String {
        format!("{}:marker:path:{}", self.prefix, path)
    }

    fn path_marker_prefix(&self) -> String {
        format!("{}:marker:path:", self.prefix)
    }

    /// Deterministic sampling: `hash(key) % frequency == 0`.
    pub fn is_sampled(&self, key: &CacheKey) -> bool {
        fnv1a32(key.as_str().as_bytes()) % self.frequency == 0
    }

    fn lookup(&self, keys: IndexSet<String>) -> IndexLookup {
        IndexLookup {
            estimated_total: keys.len().saturating_mul(self.frequency as usize),
            keys,
            complete: false,
        }
    }

    /// Marker keys whose path matches `pattern`, found by listing marker keys.
    async fn matching_path_markers(
        &self,
        pattern: &PathPattern,
    ) -> Result<Vec<String>, PixelCacheError> {
        let marker_prefix = self.path_marker_prefix();
        if pattern.is_literal() && !pattern.matches_query() {
            return Ok(vec![self.path_marker_key(pattern.as_str())]);
        }
        let path_part = pattern.as_str().split('?').next().unwrap_or_default();
        let path_pattern = PathPattern::compile(path_part)?;

        let mut markers = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .store
                .list(&marker_prefix, cursor.as_deref(), 100)
                .await?;
            for entry in page.entries {
                let path = &entry.key[marker_prefix.len()..];
                if path_pattern.is_match(path) {
                    markers.push(entry.key);
                }
            }
            if page.list_complete || page.cursor.is_none() {
                break;
            }
            cursor = page.cursor;
        }
        Ok(markers)
    }
}

#[async_trait]
impl IndexStrategy for DistributedIndex {
    fn kind(&self) -> IndexStrategyKind {
        IndexStrategyKind::Distributed
    }

    fn should_index(&self, key: &CacheKey, size: u64) -> bool {
        size >= self.small_file_threshold && self.is_sampled(key)
    }

    async fn record_tags(
        &self,
        key: &CacheKey,
        tags: &IndexSet<String>,
    ) -> Result<(), PixelCacheError> {
        for tag in tags {
            add_to_set(&self.store, &self.tag_marker_key(tag), key.as_str()).await?;
        }
        Ok(())
    }

    async fn record_path(&self, key: &CacheKey, path: &str) -> Result<(), PixelCacheError> {
        add_to_set(&self.store, &self.path_marker_key(path), key.as_str()).await?;
        Ok(())
    }

    async fn keys_for_tag(&self, tag: &str) -> Result<IndexLookup, PixelCacheError> {
        let keys = read_set(&self.store, &self.tag_marker_key(tag)).await?;
        Ok(self.lookup(keys))
    }

    async fn keys_for_path(&self, pattern: &PathPattern) -> Result<IndexLookup, PixelCacheError> {
        let mut keys = IndexSet::new();
        for marker in self.matching_path_markers(pattern).await? {
            keys.extend(read_set(&self.store, &marker).await?);
        }
        Ok(self.lookup(keys))
    }

    /// Markers are never cleaned per key; a dangling marker reference is
    /// harmless because purges re-check metadata before deleting.
    async fn forget(
        &self,
        _key: &CacheKey,
        _hint: Option<&ArtifactMetadata>,
    ) -> Result<(), PixelCacheError> {
        Ok(())
    }

    async fn drop_tag(&self, tag: &str) -> Result<(), PixelCacheError> {
        self.store.delete(&self.tag_marker_key(tag)).await
    }

    async fn drop_paths(&self, pattern: &PathPattern) -> Result<(), PixelCacheError> {
        if pattern.matches_query() {
            return Ok(());
        }
        for marker in self.matching_path_markers(pattern).await? {
            self.store.delete(&marker).await?;
        }
        Ok(())
    }

    async fn prune_dangling(&self, _budget: usize) -> Result<usize, PixelCacheError> {
        Ok(0)
    }
}
