//! Circuit breaker for the downstream API.
//!
//! # States
//! - Closed: calls pass through, retryable failures are counted
//! - Open: calls fail fast with `backend_unavailable` until `open_until`
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures reaches threshold (opens for a fixed window)
//! Open → (probing): window elapsed, next call is attempted
//! probing → Closed: first success resets the counter
//! probing → Open: the counter is still at/above threshold, so one failure reopens
//! ```
//!
//! One breaker per downstream target, owned by the long-lived executor and shared by
//! every request through it.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Default)]
struct CircuitState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Point-in-time view for status endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub consecutive_failures: u32,
    pub open: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<CircuitState>,
    failure_threshold: u32,
    open_for: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_for: Duration) -> Self {
        Self {
            state: Mutex::new(CircuitState::default()),
            failure_threshold: failure_threshold.max(1),
            open_for,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, Duration::from_secs(config.open_secs))
    }

    fn lock(&self) -> MutexGuard<'_, CircuitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a call may be attempted at `now`.
    pub fn allows(&self, now: Instant) -> bool {
        match self.lock().open_until {
            Some(until) => now >= until,
            None => true,
        }
    }

    /// Close the circuit.
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.open_until = None;
    }

    /// Count a retryable failure. Returns true when this failure opened the circuit.
    pub fn record_failure(&self, now: Instant) -> bool {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.failure_threshold {
            state.open_until = Some(now + self.open_for);
            return true;
        }
        false
    }

    pub fn snapshot(&self, now: Instant) -> CircuitSnapshot {
        let state = self.lock();
        CircuitSnapshot {
            consecutive_failures: state.consecutive_failures,
            open: state.open_until.is_some_and(|until| now < until),
        }
    }
}
