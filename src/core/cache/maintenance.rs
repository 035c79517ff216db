// src/core/cache/maintenance.rs

//! The expiry sweep. Lists keys under the cache prefix, deletes entries whose
//! `expires_at_ms` (plus the stale window) has passed, and then lets the index
//! strategy prune references to keys that no longer exist.
//!
//! Each run inspects at most `max_entries` keys and resumes where the previous
//! run stopped, so repeated runs cover the whole keyspace.

use crate::core::cache::guarded::GuardedStore;
use crate::core::cache::index::IndexStrategy;
use crate::core::cache::key::CacheKey;
use crate::core::clock::SharedClock;
use crate::core::errors::PixelCacheError;
use crate::core::metrics;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a single sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    /// Keys inspected, index keys included.
    pub scanned: usize,
    /// Expired artifacts deleted.
    pub expired: usize,
    /// Dangling index references removed.
    pub index_refs_removed: usize,
    /// True if a store error ended the sweep before its budget was used up.
    pub stopped_early: bool,
}

#[derive(Debug)]
pub struct MaintenanceSweeper {
    store: GuardedStore,
    index: Arc<dyn IndexStrategy>,
    clock: SharedClock,
    scan_prefix: String,
    page_size: usize,
    stale_window_secs: u64,
    /// Where the next sweep resumes listing. `None` starts from the beginning.
    resume_cursor: Mutex<Option<String>>,
}

impl MaintenanceSweeper {
    pub fn new(
        store: GuardedStore,
        index: Arc<dyn IndexStrategy>,
        clock: SharedClock,
        scan_prefix: String,
        page_size: usize,
        stale_window_secs: u64,
    ) -> Self {
        Self {
            store,
            index,
            clock,
            scan_prefix,
            page_size: page_size.max(1),
            stale_window_secs,
            resume_cursor: Mutex::new(None),
        }
    }

    /// Runs one bounded sweep. Never fails: errors stop the sweep early and are
    /// reported through `stopped_early`.
    pub async fn perform(&self, max_entries: usize) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        if max_entries == 0 {
            return report;
        }

        if let Err(e) = self.sweep_expired(max_entries, &mut report).await {
            let err = PixelCacheError::MaintenanceSweep(e.to_string());
            warn!(
                scanned = report.scanned,
                expired = report.expired,
                "{}. Stopping early.", err
            );
            report.stopped_early = true;
        }

        if !report.stopped_early {
            let budget = max_entries
                .saturating_sub(report.scanned)
                .max(max_entries / 10)
                .max(1);
            match self.index.prune_dangling(budget).await {
                Ok(removed) => report.index_refs_removed = removed,
                Err(e) => {
                    let err = PixelCacheError::MaintenanceSweep(e.to_string());
                    warn!("Index pruning failed: {}", err);
                    report.stopped_early = true;
                }
            }
        }

        metrics::MAINTENANCE_SWEPT_TOTAL.inc_by(report.expired as f64);
        if report.expired > 0 || report.index_refs_removed > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                index_refs_removed = report.index_refs_removed,
                "Maintenance sweep complete."
            );
        } else {
            debug!(scanned = report.scanned, "Maintenance sweep found nothing to remove.");
        }
        report
    }

    async fn sweep_expired(
        &self,
        max_entries: usize,
        report: &mut MaintenanceReport,
    ) -> Result<(), PixelCacheError> {
        let now = self.clock.now_ms();
        let mut cursor = self.resume_cursor.lock().clone();

        while report.scanned < max_entries {
            let limit = self.page_size.min(max_entries - report.scanned);
            let page = self
                .store
                .list(&self.scan_prefix, cursor.as_deref(), limit)
                .await?;

            for entry in page.entries {
                report.scanned += 1;
                *self.resume_cursor.lock() = Some(entry.key.clone());

                let Some(metadata) = entry.metadata else {
                    continue;
                };
                if !metadata.is_expired(now)
                    || metadata.is_within_stale_window(now, self.stale_window_secs)
                {
                    continue;
                }

                self.store.delete(&entry.key).await?;
                report.expired += 1;

                let key = CacheKey::from_raw(entry.key);
                if let Err(e) = self.index.forget(&key, Some(&metadata)).await {
                    warn!(key = %key, "Failed to remove index references of expired entry: {}", e);
                }
            }

            if page.list_complete || page.cursor.is_none() {
                *self.resume_cursor.lock() = None;
                break;
            }
            cursor = page.cursor;
        }
        Ok(())
    }
}
