// src/core/cache/mod.rs

//! The transform artifact cache: key derivation, metadata, TTL policy, the two
//! indexing strategies, purge, maintenance and the `CacheEngine` facade.

pub mod engine;
pub mod guarded;
pub mod index;
pub mod key;
pub mod maintenance;
pub mod metadata;
pub mod pattern;
pub mod purge;
pub mod stats;
pub mod ttl;

pub use engine::{CacheEngine, MaintenanceOutcome, PutOptions, PutOutcome, WriteStatus};
pub use key::{CacheKey, KeyCodec, TransformParams};
pub use metadata::{ArtifactMetadata, CacheLookup, CachedArtifact, SourceType};
pub use purge::PurgeOutcome;
