//! Per-provider circuit breaker.
//!
//! ```text
//!            failures >= threshold
//!   CLOSED ─────────────────────────▶ OPEN
//!     ▲                                 │ elapsed >= reset_timeout
//!     │ success                         ▼ (checked lazily on the next call)
//!     └────────────────────────────  HALF_OPEN ──failure──▶ OPEN
//! ```
//!
//! One [`CircuitBreaker`] is shared (behind an `Arc`) by every caller of the
//! same provider. All state lives behind a single mutex so concurrent
//! outcomes are applied without lost updates. While half-open, exactly one
//! probe call is admitted; everyone else is rejected until it settles.
//!
//! State is process-local and is lost on restart. Separate processes each
//! keep an independent view of the provider.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::BreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Point-in-time copy of the breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    probe_in_flight: bool,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: Duration::from_millis(config.reset_timeout_ms),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may proceed right now.
    ///
    /// The only side effects are the lazy `OPEN → HALF_OPEN` transition and
    /// claiming the single half-open probe slot.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.cooldown_elapsed(&inner) {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Read-only prediction of [`can_attempt`](Self::can_attempt).
    pub fn would_allow(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.cooldown_elapsed(&inner),
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Claim a call slot, returning a permit that must be settled.
    ///
    /// A permit dropped without being settled records a failure: the
    /// outcome of an abandoned call is unknown.
    pub fn acquire(&self) -> Option<BreakerPermit<'_>> {
        if self.can_attempt() {
            Some(BreakerPermit {
                breaker: self,
                settled: false,
            })
        } else {
            None
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.probe_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());
        inner.probe_in_flight = false;

        if inner.state == CircuitState::HalfOpen || inner.failure_count >= self.failure_threshold
        {
            if inner.state != CircuitState::Open {
                tracing::error!(
                    breaker = %self.name,
                    failure_count = inner.failure_count,
                    "circuit breaker opened; provider calls suspended"
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
        }
    }

    fn cooldown_elapsed(&self, inner: &BreakerState) -> bool {
        match inner.last_failure_at {
            Some(at) => at.elapsed() >= self.reset_timeout,
            None => true,
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        if inner.state != to {
            tracing::info!(
                breaker = %self.name,
                from = %inner.state,
                to = %to,
                "circuit breaker state transition"
            );
            inner.state = to;
        }
    }
}

/// An admitted call. Settle with [`succeed`](Self::succeed) or
/// [`fail`](Self::fail).
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!(breaker = %self.breaker.name, "call abandoned before completion");
            self.breaker.on_failure();
        }
    }
}
