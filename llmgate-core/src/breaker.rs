//! Per-provider circuit breaker.
//!
//! A standalone primitive: the adapter holds one per configured provider,
//! so a failing fallback can't mask an otherwise-healthy primary or vice
//! versa.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

/// Tunables for a single breaker.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long an open circuit waits before allowing a probe
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// Which of the three states a breaker is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Rejecting work until `open_timeout` elapses
    Open,
    /// Probing: the next request is allowed through, its outcome decides
    /// whether the circuit closes or re-opens.
    HalfOpen,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// A three-state gate that isolates a provider after repeated failures.
///
/// All three operations are internally serialized by a `parking_lot::Mutex`
/// whose critical sections are pure arithmetic — no I/O ever runs while the
/// lock is held.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Build a breaker with the given configuration, starting closed.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Current state, without mutating anything.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a request may proceed right now.
    ///
    /// An `open` breaker implicitly transitions to `half_open` once
    /// `open_timeout` has elapsed since the last failure — the probe this
    /// permits is not a lasting transition until its outcome is recorded.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed_enough = inner
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.open_timeout)
                    .unwrap_or(false);
                if elapsed_enough {
                    info!("circuit breaker: open_timeout elapsed, probing (half-open)");
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                info!("circuit breaker: probe succeeded, closing circuit");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.last_failure = None;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {
                // A success can't be recorded against an open breaker under
                // normal control flow (can_execute gates it), but reset
                // defensively if it happens.
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.last_failure = None;
            }
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());

        match inner.state {
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                warn!(
                    failures = inner.consecutive_failures,
                    "circuit breaker: failure threshold reached, opening circuit"
                );
                inner.state = CircuitState::Open;
            }
            CircuitState::HalfOpen => {
                warn!("circuit breaker: probe failed, re-opening circuit");
                inner.state = CircuitState::Open;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            open_timeout: timeout,
        })
    }

    #[test]
    fn closed_allows_execution() {
        let b = breaker(3, Duration::from_secs(30));
        assert!(b.can_execute());
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let b = breaker(3, Duration::from_secs(30));
        for _ in 0..2 {
            assert!(b.can_execute());
            b.record_failure();
        }
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.can_execute());
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.can_execute());
    }

    #[test]
    fn success_resets_counter_while_closed() {
        let b = breaker(3, Duration::from_secs(30));
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        // Two failures since the reset: still under threshold of 3.
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_success_closes_circuit() {
        let b = breaker(1, Duration::from_millis(10));
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert!(b.can_execute());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.can_execute());
    }

    #[test]
    fn half_open_probe_failure_reopens_and_refreshes_last_failure() {
        let b = breaker(1, Duration::from_millis(10));
        b.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(b.can_execute());
        b.record_failure();
        assert_eq!(b.state(), CircuitState::Open);
        // Freshly reopened: immediate re-check must not pass again.
        assert!(!b.can_execute());
    }
}
