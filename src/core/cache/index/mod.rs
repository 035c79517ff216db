// src/core/cache/index/mod.rs

//! Secondary tag/path structures used only to accelerate purges.
//!
//! Two strategies sit behind one trait and are chosen once, at construction:
//! `FullIndex` keeps exact read-modify-write sets per tag and path, while
//! `DistributedIndex` writes sampled marker sets and leaves completeness to a
//! list-and-filter scan at purge time.

pub mod distributed;
pub mod full;

use crate::config::{CacheConfig, IndexStrategyKind};
use crate::core::cache::guarded::GuardedStore;
use crate::core::cache::key::CacheKey;
use crate::core::cache::metadata::ArtifactMetadata;
use crate::core::cache::pattern::PathPattern;
use crate::core::errors::PixelCacheError;
use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexSet;
use std::fmt::Debug;
use std::sync::Arc;
use tracing::warn;

pub use distributed::DistributedIndex;
pub use full::FullIndex;

/// The result of an index lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexLookup {
    pub keys: IndexSet<String>,
    /// Estimated number of artifacts that really match.
    pub estimated_total: usize,
    /// True when `keys` is known to contain every match. Members may still be
    /// stale: an entry rewritten with other tags keeps its old references until
    /// that tag is purged, so purges check each candidate's metadata.
    pub complete: bool,
}

#[async_trait]
pub trait IndexStrategy: Send + Sync + Debug {
    fn kind(&self) -> IndexStrategyKind;

    /// Whether an artifact of `size` bytes stored under `key` gets index entries at all.
    /// Must be deterministic so rewrites make the same decision.
    fn should_index(&self, key: &CacheKey, size: u64) -> bool;

    async fn record_tags(
        &self,
        key: &CacheKey,
        tags: &IndexSet<String>,
    ) -> Result<(), PixelCacheError>;

    async fn record_path(&self, key: &CacheKey, path: &str) -> Result<(), PixelCacheError>;

    async fn keys_for_tag(&self, tag: &str) -> Result<IndexLookup, PixelCacheError>;

    async fn keys_for_path(&self, pattern: &PathPattern) -> Result<IndexLookup, PixelCacheError>;

    /// Removes references to `key`. With a metadata hint only the referenced
    /// sets are touched; without one the strategy may have to walk its sets.
    async fn forget(
        &self,
        key: &CacheKey,
        hint: Option<&ArtifactMetadata>,
    ) -> Result<(), PixelCacheError>;

    /// Drops all index state for a purged tag.
    async fn drop_tag(&self, tag: &str) -> Result<(), PixelCacheError>;

    /// Drops all index state for paths matching a purged pattern.
    async fn drop_paths(&self, pattern: &PathPattern) -> Result<(), PixelCacheError>;

    /// Removes references to keys that no longer exist, checking at most
    /// `budget` references. Returns how many references were removed.
    async fn prune_dangling(&self, budget: usize) -> Result<usize, PixelCacheError>;
}

/// Builds the strategy named in the configuration.
pub fn build_index(config: &CacheConfig, store: GuardedStore) -> Arc<dyn IndexStrategy> {
    match config.index_strategy {
        IndexStrategyKind::Full => Arc::new(FullIndex::new(&config.prefix, store)),
        IndexStrategyKind::Distributed => Arc::new(DistributedIndex::new(
            &config.prefix,
            config.small_file_threshold_bytes,
            config.index_update_frequency,
            store,
        )),
    }
}

/// Reads a JSON-encoded key set. Missing or corrupt sets read as empty.
pub(crate) async fn read_set(
    store: &GuardedStore,
    key: &str,
) -> Result<IndexSet<String>, PixelCacheError> {
    let Some(value) = store.get(key).await? else {
        return Ok(IndexSet::new());
    };
    match serde_json::from_slice(&value.body) {
        Ok(set) => Ok(set),
        Err(e) => {
            warn!(index_key = key, "Discarding unreadable index set: {}", e);
            Ok(IndexSet::new())
        }
    }
}

/// Writes a key set, deleting the index key when the set is empty.
pub(crate) async fn write_set(
    store: &GuardedStore,
    key: &str,
    set: &IndexSet<String>,
) -> Result<(), PixelCacheError> {
    if set.is_empty() {
        return store.delete(key).await;
    }
    let body = Bytes::from(serde_json::to_vec(set)?);
    store.put(key, body, None, None).await
}

/// Adds `member` to the set at `key`. Returns `true` if the set changed.
/// Read-modify-write: concurrent updates of the same set are last-writer-wins.
pub(crate) async fn add_to_set(
    store: &GuardedStore,
    key: &str,
    member: &str,
) -> Result<bool, PixelCacheError> {
    let mut set = read_set(store, key).await?;
    if !set.insert(member.to_string()) {
        return Ok(false);
    }
    write_set(store, key, &set).await?;
    Ok(true)
}

/// Removes `member` from the set at `key`. Returns `true` if the set is now empty.
pub(crate) async fn remove_from_set(
    store: &GuardedStore,
    key: &str,
    member: &str,
) -> Result<bool, PixelCacheError> {
    let mut set = read_set(store, key).await?;
    if set.shift_remove(member) {
        write_set(store, key, &set).await?;
    }
    Ok(set.is_empty())
}
