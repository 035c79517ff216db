// src/core/store/mod.rs

//! The key-value store contract the cache engine is built on.
//!
//! The store is a single logical namespace with prefix listing and per-entry
//! metadata. It offers no cross-key transactions; every mutation is a key-scoped
//! put or delete.

pub mod memory;

use crate::core::cache::metadata::ArtifactMetadata;
use crate::core::errors::PixelCacheError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;

pub use memory::MemoryStore;

/// A value plus the metadata stored alongside it. Index keys carry no metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
    pub body: Bytes,
    pub metadata: Option<ArtifactMetadata>,
}

/// One entry in a listing page. Listings never transfer payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub key: String,
    pub metadata: Option<ArtifactMetadata>,
}

/// A page of listing results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,
    /// Pass back to continue listing. `None` once the listing is complete.
    pub cursor: Option<String>,
    pub list_complete: bool,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync + Debug {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, PixelCacheError>;

    /// Reads only the metadata of an entry, without transferring its payload.
    async fn get_metadata(&self, key: &str)
    -> Result<Option<ArtifactMetadata>, PixelCacheError>;

    /// Stores `body` under `key`. A `ttl_seconds` of `None` means the entry never
    /// expires at the store level.
    async fn put(
        &self,
        key: &str,
        body: Bytes,
        metadata: Option<ArtifactMetadata>,
        ttl_seconds: Option<u64>,
    ) -> Result<(), PixelCacheError>;

    async fn delete(&self, key: &str) -> Result<(), PixelCacheError>;

    /// Lists keys starting with `prefix` in key order, resuming after `cursor`.
    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, PixelCacheError>;
}
