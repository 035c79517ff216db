// src/core/store/memory.rs

//! An in-process `KeyValueStore`.
//!
//! Keys are kept in order so a listing cursor is simply the last key returned.
//! Physical expiry is deliberately coarse: TTLs shorter than `min_ttl_secs` are
//! rounded up, the way hosted key-value stores enforce a minimum TTL. The engine
//! therefore never relies on the store to hide expired artifacts.

use super::{KeyValueStore, ListEntry, ListPage, StoredValue};
use crate::core::cache::metadata::ArtifactMetadata;
use crate::core::clock::{SharedClock, system_clock};
use crate::core::errors::PixelCacheError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Default lower bound for physical TTLs, in seconds.
pub const DEFAULT_MIN_PHYSICAL_TTL_SECS: u64 = 60;

#[derive(Debug, Clone)]
struct Record {
    body: Bytes,
    metadata: Option<ArtifactMetadata>,
    expires_at_ms: Option<i64>,
}

impl Record {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at_ms.is_none_or(|exp| now_ms < exp)
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Record>>,
    clock: SharedClock,
    min_ttl_secs: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(system_clock())
    }
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self::with_min_ttl(clock, DEFAULT_MIN_PHYSICAL_TTL_SECS)
    }

    pub fn with_min_ttl(clock: SharedClock, min_ttl_secs: u64) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            clock,
            min_ttl_secs,
        }
    }

    /// Number of physically present entries, including ones past their TTL.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is physically present and live, bypassing the async API.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        self.entries
            .read()
            .get(key)
            .is_some_and(|record| record.is_live(now))
    }

    /// Every live key, in order.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        self.entries
            .read()
            .iter()
            .filter(|(_, record)| record.is_live(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn live_record(&self, key: &str) -> Option<Record> {
        let now = self.clock.now_ms();
        {
            let guard = self.entries.read();
            match guard.get(key) {
                Some(record) if record.is_live(now) => return Some(record.clone()),
                None => return None,
                Some(_) => {}
            }
        }
        // Physically expired: drop it while we are here.
        self.entries.write().remove(key);
        None
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<StoredValue>, PixelCacheError> {
        Ok(self.live_record(key).map(|record| StoredValue {
            body: record.body,
            metadata: record.metadata,
        }))
    }

    async fn get_metadata(
        &self,
        key: &str,
    ) -> Result<Option<ArtifactMetadata>, PixelCacheError> {
        Ok(self.live_record(key).and_then(|record| record.metadata))
    }

    async fn put(
        &self,
        key: &str,
        body: Bytes,
        metadata: Option<ArtifactMetadata>,
        ttl_seconds: Option<u64>,
    ) -> Result<(), PixelCacheError> {
        let expires_at_ms = ttl_seconds.map(|ttl| {
            let ttl = ttl.max(self.min_ttl_secs);
            self.clock
                .now_ms()
                .saturating_add(ttl.saturating_mul(1000) as i64)
        });
        self.entries.write().insert(
            key.to_string(),
            Record {
                body,
                metadata,
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PixelCacheError> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ListPage, PixelCacheError> {
        let now = self.clock.now_ms();
        let guard = self.entries.read();

        let start = match cursor {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Included(prefix.to_string()),
        };

        let mut matching = guard
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(_, record)| record.is_live(now));

        let entries: Vec<ListEntry> = matching
            .by_ref()
            .take(limit.max(1))
            .map(|(key, record)| ListEntry {
                key: key.clone(),
                metadata: record.metadata.clone(),
            })
            .collect();
        let has_more = matching.next().is_some();

        let cursor = if has_more {
            entries.last().map(|entry| entry.key.clone())
        } else {
            None
        };
        Ok(ListPage {
            entries,
            cursor,
            list_complete: !has_more,
        })
    }
}
