// src/core/cache/stats.rs

//! Hit/miss counters kept by the facade, and the stats snapshot it reports.

use crate::core::resilience::BreakerSnapshot;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Process-local counters. These reset on restart; the entry count and byte
/// total in `CacheStats` come from the store itself.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    revalidations: AtomicU64,
    /// Milliseconds since the epoch. 0 means never.
    last_maintenance_at: AtomicI64,
}

impl CacheCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// A stale hit counts as a hit as well.
    pub fn record_stale_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_revalidation(&self) {
        self.revalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_maintenance(&self, now_ms: i64) {
        self.last_maintenance_at.store(now_ms, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn stale_hits(&self) -> u64 {
        self.stale_hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn revalidations(&self) -> u64 {
        self.revalidations.load(Ordering::Relaxed)
    }

    pub fn last_maintenance_at(&self) -> Option<i64> {
        match self.last_maintenance_at.load(Ordering::Relaxed) {
            0 => None,
            at => Some(at),
        }
    }
}

/// The result of `CacheEngine::stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entry_count: u64,
    pub total_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub stale_hit_count: u64,
    pub revalidation_count: u64,
    pub last_maintenance_at: Option<i64>,
    /// False if the scan stopped at the configured limit and the totals are partial.
    pub scan_complete: bool,
    pub breakers: Vec<BreakerSnapshot>,
}
