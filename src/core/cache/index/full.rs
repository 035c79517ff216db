// src/core/cache/index/full.rs

//! Full secondary indices: `tag → keys` and `path → keys` sets plus the master
//! sets of every known tag and path, all stored as ordinary keys.
//!
//! Lookups cost one read, but every artifact write fans out into up to
//! `tags + 2` extra read-modify-write cycles.

use super::{IndexLookup, IndexStrategy, add_to_set, read_set, remove_from_set, write_set};
use crate::config::IndexStrategyKind;
use crate::core::cache::guarded::GuardedStore;
use crate::core::cache::key::CacheKey;
use crate::core::cache::metadata::ArtifactMetadata;
use crate::core::cache::pattern::PathPattern;
use crate::core::errors::PixelCacheError;
use async_trait::async_trait;
use indexmap::IndexSet;
use tracing::debug;

#[derive(Debug)]
pub struct FullIndex {
    prefix: String,
    store: GuardedStore,
}

impl FullIndex {
    pub fn new(prefix: &str, store: GuardedStore) -> Self {
        Self {
            prefix: prefix.to_string(),
            store,
        }
    }

    pub fn tag_key(&self, tag: &str) -> String {
        format!("{}:tag:{}", self.prefix, tag)
    }

    pub fn path_key(&self, path: &str) -> String {
        format!("{}:path:{}", self.prefix, path)
    }

    pub fn all_tags_key(&self) -> String {
        format!("{}:all-tags", self.prefix)
    }

    pub fn all_paths_key(&self) -> String {
        format!("{}:all-paths", self.prefix)
    }

    pub async fn all_tags(&self) -> Result<IndexSet<String>, PixelCacheError> {
        read_set(&self.store, &self.all_tags_key()).await
    }

    pub async fn all_paths(&self) -> Result<IndexSet<String>, PixelCacheError> {
        read_set(&self.store, &self.all_paths_key()).await
    }

    async fn remove_tag_member(&self, tag: &str, key: &str) -> Result<(), PixelCacheError> {
        if remove_from_set(&self.store, &self.tag_key(tag), key).await? {
            remove_from_set(&self.store, &self.all_tags_key(), tag).await?;
        }
        Ok(())
    }

    async fn remove_path_member(&self, path: &str, key: &str) -> Result<(), PixelCacheError> {
        if remove_from_set(&self.store, &self.path_key(path), key).await? {
            remove_from_set(&self.store, &self.all_paths_key(), path).await?;
        }
        Ok(())
    }

    /// Paths known to the index that match the path part of `pattern`.
    async fn matching_paths(
        &self,
        pattern: &PathPattern,
    ) -> Result<Vec<String>, PixelCacheError> {
        if pattern.is_literal() && !pattern.matches_query() {
            return Ok(vec![pattern.as_str().to_string()]);
        }
        let path_part = pattern.as_str().split('?').next().unwrap_or_default();
        let path_pattern = PathPattern::compile(path_part)?;
        Ok(self
            .all_paths()
            .await?
            .into_iter()
            .filter(|path| path_pattern.is_match(path))
            .collect())
    }
}

#[async_trait]
impl IndexStrategy for FullIndex {
    fn kind(&self) -> IndexStrategyKind {
        IndexStrategyKind::Full
    }

    fn should_index(&self, _key: &CacheKey, _size: u64) -> bool {
        true
    }

    async fn record_tags(
        &self,
        key: &CacheKey,
        tags: &IndexSet<String>,
    ) -> Result<(), PixelCacheError> {
        for tag in tags {
            add_to_set(&self.store, &self.tag_key(tag), key.as_str()).await?;
            add_to_set(&self.store, &self.all_tags_key(), tag).await?;
        }
        Ok(())
    }

    async fn record_path(&self, key: &CacheKey, path: &str) -> Result<(), PixelCacheError> {
        add_to_set(&self.store, &self.path_key(path), key.as_str()).await?;
        add_to_set(&self.store, &self.all_paths_key(), path).await?;
        Ok(())
    }

    async fn keys_for_tag(&self, tag: &str) -> Result<IndexLookup, PixelCacheError> {
        let keys = read_set(&self.store, &self.tag_key(tag)).await?;
        Ok(IndexLookup {
            estimated_total: keys.len(),
            keys,
            complete: true,
        })
    }

    async fn keys_for_path(&self, pattern: &PathPattern) -> Result<IndexLookup, PixelCacheError> {
        let mut keys = IndexSet::new();
        for path in self.matching_paths(pattern).await? {
            keys.extend(read_set(&self.store, &self.path_key(&path)).await?);
        }
        Ok(IndexLookup {
            estimated_total: keys.len(),
            keys,
            complete: true,
        })
    }

    async fn forget(
        &self,
        key: &CacheKey,
        hint: Option<&ArtifactMetadata>,
    ) -> Result<(), PixelCacheError> {
        match hint {
            Some(metadata) => {
                for tag in &metadata.tags {
                    self.remove_tag_member(tag, key.as_str()).await?;
                }
                self.remove_path_member(metadata.path(), key.as_str())
                    .await?;
            }
            None => {
                for tag in self.all_tags().await? {
                    self.remove_tag_member(&tag, key.as_str()).await?;
                }
                for path in self.all_paths().await? {
                    self.remove_path_member(&path, key.as_str()).await?;
                }
            }
        }
        Ok(())
    }

    async fn drop_tag(&self, tag: &str) -> Result<(), PixelCacheError> {
        self.store.delete(&self.tag_key(tag)).await?;
        remove_from_set(&self.store, &self.all_tags_key(), tag).await?;
        Ok(())
    }

    async fn drop_paths(&self, pattern: &PathPattern) -> Result<(), PixelCacheError> {
        // Query patterns remove single transformations; the path set may still
        // reference other variants and is trimmed per key instead.
        if pattern.matches_query() {
            return Ok(());
        }
        let paths = self.matching_paths(pattern).await?;
        if paths.is_empty() {
            return Ok(());
        }
        for path in &paths {
            self.store.delete(&self.path_key(path)).await?;
        }
        let mut all_paths = self.all_paths().await?;
        all_paths.retain(|path| !paths.contains(path));
        write_set(&self.store, &self.all_paths_key(), &all_paths).await
    }

    async fn prune_dangling(&self, budget: usize) -> Result<usize, PixelCacheError> {
        let mut checked = 0usize;
        let mut removed = 0usize;

        let set_keys: Vec<(String, String)> = self
            .all_tags()
            .await?
            .into_iter()
            .map(|tag| (self.tag_key(&tag), tag))
            .chain(
                self.all_paths()
                    .await?
                    .into_iter()
                    .map(|path| (self.path_key(&path), path)),
            )
            .collect();
        let tag_prefix = format!("{}:tag:", self.prefix);

        for (set_key, member_name) in set_keys {
            if checked >= budget {
                break;
            }
            let mut set = read_set(&self.store, &set_key).await?;
            let before = set.len();
            let mut live = IndexSet::with_capacity(before);
            for key in set.drain(..) {
                if checked >= budget {
                    live.insert(key);
                    continue;
                }
                checked += 1;
                if self.store.get_metadata(&key).await?.is_some() {
                    live.insert(key);
                }
            }
            if live.len() == before {
                continue;
            }
            removed += before - live.len();
            write_set(&self.store, &set_key, &live).await?;
            if live.is_empty() {
                let master = if set_key.starts_with(&tag_prefix) {
                    self.all_tags_key()
                } else {
                    self.all_paths_key()
                };
                remove_from_set(&self.store, &master, &member_name).await?;
            }
        }

        if removed > 0 {
            debug!(removed, checked, "Pruned dangling index references.");
        }
        Ok(removed)
    }
}
