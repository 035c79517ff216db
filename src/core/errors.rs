// src/core/errors.rs

//! Defines the primary error type for the cache engine and its collaborators.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure the engine can observe.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum PixelCacheError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// The key-value store could not be reached. Retryable and tracked by the breaker.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A guarded call exceeded its deadline. Treated like `StoreUnavailable` for accounting.
    #[error("Operation '{0}' timed out")]
    Timeout(String),

    /// The breaker for the named resource is open and the call was rejected without running.
    #[error("Circuit open for '{0}'")]
    CircuitOpen(String),

    /// A stored entry failed validation (missing metadata, non-image content type, size mismatch).
    #[error("Invalid cached entry '{key}': {reason}")]
    InvalidCachedEntry { key: String, reason: String },

    /// A single key could not be deleted during a batch purge.
    #[error("Failed to purge key '{key}': {reason}")]
    PurgeKeyFailure { key: String, reason: String },

    /// The origin transform provider failed. Never retried by the engine.
    #[error("Origin transform failed: {0}")]
    OriginTransformFailure(String),

    #[error("Maintenance sweep error: {0}")]
    MaintenanceSweep(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl PixelCacheError {
    /// Returns `true` for failures that may succeed when attempted again and that
    /// count against a circuit breaker.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PixelCacheError::StoreUnavailable(_)
                | PixelCacheError::Timeout(_)
                | PixelCacheError::Io(_)
        )
    }

    /// Returns `true` if this error means the store could not be consulted at all,
    /// as opposed to the store answering with something unusable.
    pub fn is_unavailable(&self) -> bool {
        self.is_retryable() || matches!(self, PixelCacheError::CircuitOpen(_))
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for PixelCacheError {
    fn clone(&self) -> Self {
        match self {
            PixelCacheError::Io(e) => PixelCacheError::Io(Arc::clone(e)),
            PixelCacheError::StoreUnavailable(s) => PixelCacheError::StoreUnavailable(s.clone()),
            PixelCacheError::Timeout(s) => PixelCacheError::Timeout(s.clone()),
            PixelCacheError::CircuitOpen(s) => PixelCacheError::CircuitOpen(s.clone()),
            PixelCacheError::InvalidCachedEntry { key, reason } => {
                PixelCacheError::InvalidCachedEntry {
                    key: key.clone(),
                    reason: reason.clone(),
                }
            }
            PixelCacheError::PurgeKeyFailure { key, reason } => PixelCacheError::PurgeKeyFailure {
                key: key.clone(),
                reason: reason.clone(),
            },
            PixelCacheError::OriginTransformFailure(s) => {
                PixelCacheError::OriginTransformFailure(s.clone())
            }
            PixelCacheError::MaintenanceSweep(s) => PixelCacheError::MaintenanceSweep(s.clone()),
            PixelCacheError::InvalidRequest(s) => PixelCacheError::InvalidRequest(s.clone()),
            PixelCacheError::Serialization(s) => PixelCacheError::Serialization(s.clone()),
            PixelCacheError::Config(s) => PixelCacheError::Config(s.clone()),
            PixelCacheError::Internal(s) => PixelCacheError::Internal(s.clone()),
        }
    }
}

impl PartialEq for PixelCacheError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PixelCacheError::Io(e1), PixelCacheError::Io(e2)) => e1.to_string() == e2.to_string(),
            (PixelCacheError::StoreUnavailable(s1), PixelCacheError::StoreUnavailable(s2)) => {
                s1 == s2
            }
            (PixelCacheError::Timeout(s1), PixelCacheError::Timeout(s2)) => s1 == s2,
            (PixelCacheError::CircuitOpen(s1), PixelCacheError::CircuitOpen(s2)) => s1 == s2,
            (
                PixelCacheError::InvalidCachedEntry { key: k1, reason: r1 },
                PixelCacheError::InvalidCachedEntry { key: k2, reason: r2 },
            ) => k1 == k2 && r1 == r2,
            (
                PixelCacheError::PurgeKeyFailure { key: k1, reason: r1 },
                PixelCacheError::PurgeKeyFailure { key: k2, reason: r2 },
            ) => k1 == k2 && r1 == r2,
            (
                PixelCacheError::OriginTransformFailure(s1),
                PixelCacheError::OriginTransformFailure(s2),
            ) => s1 == s2,
            (PixelCacheError::MaintenanceSweep(s1), PixelCacheError::MaintenanceSweep(s2)) => {
                s1 == s2
            }
            (PixelCacheError::InvalidRequest(s1), PixelCacheError::InvalidRequest(s2)) => s1 == s2,
            (PixelCacheError::Serialization(s1), PixelCacheError::Serialization(s2)) => s1 == s2,
            (PixelCacheError::Config(s1), PixelCacheError::Config(s2)) => s1 == s2,
            (PixelCacheError::Internal(s1), PixelCacheError::Internal(s2)) => s1 == s2,
            _ => false,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for PixelCacheError {
    fn from(e: std::io::Error) -> Self {
        PixelCacheError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for PixelCacheError {
    fn from(e: reqwest::Error) -> Self {
        PixelCacheError::OriginTransformFailure(e.to_string())
    }
}

impl From<serde_json::Error> for PixelCacheError {
    fn from(e: serde_json::Error) -> Self {
        PixelCacheError::Serialization(format!(
            "JSON serialization/deserialization error: {e}"
        ))
    }
}

impl From<regex::Error> for PixelCacheError {
    fn from(e: regex::Error) -> Self {
        PixelCacheError::InvalidRequest(format!("Invalid path pattern: {e}"))
    }
}
