// src/core/cache/guarded.rs

//! Store access routed through the resilience layer. Every component of the
//! engine talks to the store through this type, never directly.

use crate::core::cache::metadata::ArtifactMetadata;
use crate::core::errors::PixelCacheError;
use crate::core::resilience::Resilience;
use crate::core::store::{KeyValueStore, ListPage, StoredValue};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct GuardedStore {
    store: Arc<dyn KeyValueStore>,
    resilience: Arc<Resilience>,
}

impl GuardedStore {
    pub fn new(store: Arc<dyn KeyValueStore>, resilience: Arc<Resilience>) -> Self {
        Self { store, resilience }
    }

    pub fn resilience(&self) -> &Arc<Resilience> {
        &self.resilience
    }

    pub async fn get(&self, key: &str) -> Result<Option<StoredValue>, PixelCacheError> {
        self.resilience
            .store_read
            .call("get", || self.store.get(key))
            .await
    }

    pub async fn get_metadata(
        &self,
        key: &str,
    ) -> Result<Option<ArtifactMetadata>, PixelCacheError> {
        self.resilience
            .store_read
            .call("get_metadata", || self.store.get_metadata(key))
            .await
    }

    pub async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, PixelCacheError> {
        self.resilience
            .store_read
            .call("list", || self.store.list(prefix, cursor, limit))
            .await
    }

    pub async fn put(
        &self,
        key: &str,
        body: Bytes,
        metadata: Option<ArtifactMetadata>,
        ttl_seconds: Option<u64>,
    ) -> Result<(), PixelCacheError> {
        self.resilience
            .store_write
            .call("put", || {
                self.store
                    .put(key, body.clone(), metadata.clone(), ttl_seconds)
            })
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<(), PixelCacheError> {
        self.resilience
            .store_write
            .call("delete", || self.store.delete(key))
            .await
    }
}
