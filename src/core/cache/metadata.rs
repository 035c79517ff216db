// src/core/cache/metadata.rs

//! The value+metadata envelope stored with every cached artifact.

use crate::core::cache::key::{CacheKey, TransformParams};
use crate::core::errors::PixelCacheError;
use bytes::Bytes;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Media-type prefix every servable artifact must carry.
pub const IMAGE_CONTENT_TYPE_PREFIX: &str = "image/";

/// Where the original bytes of an artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SourceType {
    ObjectStore,
    #[default]
    RemoteHttp,
    Fallback,
}

/// Metadata attached to every stored artifact. Written once, never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMetadata {
    /// Canonical request URL (path plus canonical query) that produced the artifact.
    pub url: String,
    /// Creation time in milliseconds since the epoch.
    pub timestamp: i64,
    pub content_type: String,
    pub size: i64,
    pub transform_options: TransformParams,
    pub tags: IndexSet<String>,
    pub ttl_seconds: i32,
    /// Always `timestamp + ttl_seconds * 1000`.
    pub expires_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
    #[serde(default)]
    pub source_type: SourceType,
}

impl ArtifactMetadata {
    /// Builds metadata, deriving `expires_at_ms` and the compression ratio.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        url: String,
        timestamp: i64,
        content_type: String,
        size: i64,
        transform_options: TransformParams,
        tags: IndexSet<String>,
        ttl_seconds: i32,
        original_size: Option<i64>,
        source_type: SourceType,
    ) -> Self {
        let compression_ratio = original_size
            .filter(|original| *original > 0)
            .map(|original| size as f64 / original as f64);
        Self {
            url,
            timestamp,
            content_type,
            size,
            transform_options,
            tags,
            ttl_seconds,
            expires_at_ms: timestamp + i64::from(ttl_seconds) * 1000,
            original_size,
            compression_ratio,
            source_type,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// True while an expired entry is still inside the stale-while-revalidate window.
    pub fn is_within_stale_window(&self, now_ms: i64, stale_window_secs: u64) -> bool {
        stale_window_secs > 0
            && now_ms < self.expires_at_ms.saturating_add(stale_window_secs as i64 * 1000)
    }

    pub fn has_image_content_type(&self) -> bool {
        is_image_content_type(&self.content_type)
    }

    /// The path component of `url`.
    pub fn path(&self) -> &str {
        let without_fragment = self.url.split('#').next().unwrap_or_default();
        without_fragment.split('?').next().unwrap_or_default()
    }

    /// `url` without any fragment, path and query together.
    pub fn path_and_query(&self) -> &str {
        self.url.split('#').next().unwrap_or_default()
    }

    /// Validates a fetched entry before it may be served.
    pub fn validate(&self, key: &CacheKey, body: &Bytes) -> Result<(), PixelCacheError> {
        if !self.has_image_content_type() {
            return Err(PixelCacheError::InvalidCachedEntry {
                key: key.to_string(),
                reason: format!("content type '{}' is not an image", self.content_type),
            });
        }
        if self.size != body.len() as i64 {
            return Err(PixelCacheError::InvalidCachedEntry {
                key: key.to_string(),
                reason: format!(
                    "payload size {} does not match recorded size {}",
                    body.len(),
                    self.size
                ),
            });
        }
        if self.expires_at_ms != self.timestamp + i64::from(self.ttl_seconds) * 1000 {
            return Err(PixelCacheError::InvalidCachedEntry {
                key: key.to_string(),
                reason: "expiry does not match timestamp and ttl".to_string(),
            });
        }
        Ok(())
    }

    /// Confirms the entry was written for `expected_url`. Keys only carry a
    /// 32-bit hash, so two transformations can land on the same key.
    pub fn check_owner(&self, key: &CacheKey, expected_url: &str) -> Result<(), PixelCacheError> {
        if self.url != expected_url {
            return Err(PixelCacheError::InvalidCachedEntry {
                key: key.to_string(),
                reason: format!(
                    "entry belongs to '{}', not '{}'",
                    self.url, expected_url
                ),
            });
        }
        Ok(())
    }
}

pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with(IMAGE_CONTENT_TYPE_PREFIX)
}

/// An artifact as returned to callers of the facade.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedArtifact {
    pub key: CacheKey,
    pub body: Bytes,
    pub metadata: ArtifactMetadata,
}

impl CachedArtifact {
    pub fn content_type(&self) -> &str {
        &self.metadata.content_type
    }

    /// Seconds of freshness left at `now_ms`, never negative.
    pub fn remaining_ttl_secs(&self, now_ms: i64) -> u64 {
        ((self.metadata.expires_at_ms - now_ms).max(0) / 1000) as u64
    }
}

/// The result of a facade read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// A valid, unexpired entry.
    Fresh(CachedArtifact),
    /// Expired but inside the stale-while-revalidate window. A revalidation was scheduled.
    Stale(CachedArtifact),
    /// Nothing usable is cached.
    Miss,
    /// The store could not be consulted. Carries no cache information; the caller
    /// should proceed as on a miss but skip the write-back expectations.
    Unavailable,
}

impl CacheLookup {
    /// The artifact, if one can be served.
    pub fn artifact(&self) -> Option<&CachedArtifact> {
        match self {
            CacheLookup::Fresh(a) | CacheLookup::Stale(a) => Some(a),
            CacheLookup::Miss | CacheLookup::Unavailable => None,
        }
    }

    pub fn into_artifact(self) -> Option<CachedArtifact> {
        match self {
            CacheLookup::Fresh(a) | CacheLookup::Stale(a) => Some(a),
            CacheLookup::Miss | CacheLookup::Unavailable => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.artifact().is_some()
    }

    /// The `X-Cache` header value for this outcome.
    pub fn cache_status(&self) -> &'static str {
        match self {
            CacheLookup::Fresh(_) => "HIT",
            CacheLookup::Stale(_) => "STALE",
            CacheLookup::Miss => "MISS",
            CacheLookup::Unavailable => "BYPASS",
        }
    }
}
