// src/core/mod.rs

//! The central module containing the cache engine and its collaborators.

pub mod cache;
pub mod clock;
pub mod errors;
pub mod metrics;
pub mod origin;
pub mod resilience;
pub mod service;
pub mod store;
pub mod tasks;

pub use errors::PixelCacheError;
