// src/core/resilience/mod.rs

//! The resilience layer every store and origin call flows through:
//! a per-resource circuit breaker, a per-attempt timeout and retry with backoff.
//!
//! The read-side fallback ladder (fresh → stale → synthetic "no cache information")
//! lives in the engine, which interprets the errors produced here.

pub mod breaker;
pub mod retry;

use crate::config::{OriginConfig, ResilienceConfig};
use crate::core::clock::SharedClock;
use crate::core::errors::PixelCacheError;
use crate::core::metrics;
use breaker::{BreakerState, CircuitBreaker};
use retry::RetryPolicy;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

pub const STORE_READ: &str = "store-read";
pub const STORE_WRITE: &str = "store-write";
pub const ORIGIN_TRANSFORM: &str = "origin-transform";

/// A breaker + timeout + retry bundle for one resource.
#[derive(Debug)]
pub struct Guard {
    resource: &'static str,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    timeout: Duration,
    /// Decides which errors count as failures of the resource.
    counts_as_failure: fn(&PixelCacheError) -> bool,
}

fn store_failure(e: &PixelCacheError) -> bool {
    e.is_retryable()
}

fn origin_failure(e: &PixelCacheError) -> bool {
    matches!(
        e,
        PixelCacheError::OriginTransformFailure(_) | PixelCacheError::Timeout(_)
    )
}

impl Guard {
    pub fn new(
        resource: &'static str,
        breaker: CircuitBreaker,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            resource,
            breaker,
            retry,
            timeout,
            counts_as_failure: store_failure,
        }
    }

    fn counting(mut self, counts_as_failure: fn(&PixelCacheError) -> bool) -> Self {
        self.counts_as_failure = counts_as_failure;
        self
    }

    pub fn resource(&self) -> &'static str {
        self.resource
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Runs `op` under the breaker, retrying retryable failures while the breaker
    /// stays closed. An open breaker fails fast and is never retried.
    pub async fn call<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T, PixelCacheError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PixelCacheError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let permit = self.breaker.try_acquire()?;

            let outcome = match tokio::time::timeout(self.timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(PixelCacheError::Timeout(format!("{}/{}", self.resource, op))),
            };

            let err = match outcome {
                Ok(value) => {
                    self.breaker.record_success(permit);
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !(self.counts_as_failure)(&err) {
                self.breaker.release(permit);
                return Err(err);
            }
            self.breaker.record_failure(permit);

            if !err.is_retryable()
                || attempt >= self.retry.max_attempts
                || self.breaker.state() != BreakerState::Closed
            {
                return Err(err);
            }

            let delay = self.retry.delay_for(attempt);
            debug!(
                resource = self.resource,
                op, attempt, "Guarded call failed: {}. Retrying in {:?}.", err, delay
            );
            metrics::GUARDED_RETRIES_TOTAL
                .with_label_values(&[self.resource])
                .inc();
            tokio::time::sleep(delay).await;
        }
    }
}

/// Snapshot of one breaker for stats output.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub resource: &'static str,
    pub state: BreakerState,
}

/// The guarded resources: store reads, store writes and origin transforms.
#[derive(Debug)]
pub struct Resilience {
    pub store_read: Guard,
    pub store_write: Guard,
    pub origin: Guard,
}

impl Resilience {
    pub fn new(config: &ResilienceConfig, origin: &OriginConfig, clock: SharedClock) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        let timeout = Duration::from_millis(config.timeout_ms);
        Self {
            store_read: Guard::new(
                STORE_READ,
                CircuitBreaker::new(STORE_READ, config.breaker.clone(), clock.clone()),
                retry.clone(),
                timeout,
            ),
            store_write: Guard::new(
                STORE_WRITE,
                CircuitBreaker::new(STORE_WRITE, config.breaker.clone(), clock.clone()),
                retry,
                timeout,
            ),
            // Retrying the origin is the origin provider's own responsibility.
            origin: Guard::new(
                ORIGIN_TRANSFORM,
                CircuitBreaker::new(ORIGIN_TRANSFORM, config.breaker.clone(), clock),
                RetryPolicy::none(),
                Duration::from_millis(origin.timeout_ms),
            )
            .counting(origin_failure),
        }
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        [&self.store_read, &self.store_write, &self.origin]
            .into_iter()
            .map(|guard| BreakerSnapshot {
                resource: guard.resource,
                state: guard.breaker.state(),
            })
            .collect()
    }
}
