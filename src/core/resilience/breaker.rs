// src/core/resilience/breaker.rs

//! A three-state circuit breaker.
//!
//! Closed → Open after `failure_threshold` consecutive failures.
//! Open → Half-Open once `reset_timeout_ms` has elapsed; exactly one trial call
//! is admitted at a time while half-open.
//! Half-Open → Closed after `success_threshold` consecutive successful trials.
//! Half-Open → Open on any failure.

use crate::config::BreakerConfig;
use crate::core::clock::SharedClock;
use crate::core::errors::PixelCacheError;
use crate::core::metrics;
use parking_lot::Mutex;
use serde::Serialize;
use strum_macros::Display;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn gauge_value(self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at_ms: i64,
    trial_in_flight: bool,
}

/// Proof that the breaker admitted a call. Hand it back through
/// `record_success` / `record_failure`.
#[derive(Debug)]
#[must_use]
pub struct Permit {
    trial: bool,
}

impl Permit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: SharedClock) -> Self {
        let name = name.into();
        metrics::BREAKER_STATE
            .with_label_values(&[name.as_str()])
            .set(BreakerState::Closed.gauge_value());
        Self {
            name,
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at_ms: 0,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current state, promoting Open to Half-Open if the cooldown has elapsed.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        inner.state
    }

    /// Asks to run a call. Fails fast with `CircuitOpen` without running anything.
    pub fn try_acquire(&self) -> Result<Permit, PixelCacheError> {
        let mut inner = self.inner.lock();
        self.maybe_half_open(&mut inner);
        match inner.state {
            BreakerState::Closed => Ok(Permit { trial: false }),
            BreakerState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(Permit { trial: true })
            }
            _ => Err(PixelCacheError::CircuitOpen(self.name.clone())),
        }
    }

    pub fn record_success(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen if permit.trial => {
                inner.trial_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    self.transition(&mut inner, BreakerState::Closed);
                }
            }
            // A call admitted before the breaker opened; its outcome is stale.
            _ => {}
        }
    }

    pub fn record_failure(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen if permit.trial => {
                inner.trial_in_flight = false;
                self.transition(&mut inner, BreakerState::Open);
            }
            _ => {}
        }
    }

    /// Forgets an admitted call that neither succeeded nor failed in a way the
    /// breaker should count (e.g. a non-retryable validation error).
    pub fn release(&self, permit: Permit) {
        if permit.trial {
            self.inner.lock().trial_in_flight = false;
        }
    }

    fn maybe_half_open(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            let elapsed = self.clock.now_ms() - inner.opened_at_ms;
            if elapsed >= self.config.reset_timeout_ms as i64 {
                self.transition(inner, BreakerState::HalfOpen);
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.trial_in_flight = false;
        if to == BreakerState::Open {
            inner.opened_at_ms = self.clock.now_ms();
            warn!(breaker = %self.name, "Circuit breaker opened ({} -> {}).", from, to);
        } else {
            info!(breaker = %self.name, "Circuit breaker transition {} -> {}.", from, to);
        }
        metrics::BREAKER_STATE
            .with_label_values(&[self.name.as_str()])
            .set(to.gauge_value());
    }
}
