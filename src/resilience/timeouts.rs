//! Caller deadline propagation.
//!
//! A caller passes an absolute deadline; each attempt gets
//! `min(deadline - now, default_timeout)`. Instants are tokio's so paused-clock
//! tests drive them.

use std::time::Duration;
use tokio::time::Instant;

use crate::downstream::{GatewayError, GatewayResult};

/// Per-attempt timeout given the caller's deadline.
///
/// Fails with `deadline_exceeded` when the deadline has already passed.
pub fn attempt_timeout(deadline: Option<Instant>, default: Duration, now: Instant) -> GatewayResult<Duration> {
    match deadline {
        None => Ok(default),
        Some(deadline) if deadline <= now => Err(GatewayError::deadline_exceeded(
            "caller deadline elapsed before attempting",
        )),
        Some(deadline) => Ok((deadline - now).min(default)),
    }
}

/// Whether sleeping `delay` from `now` still leaves time before the deadline.
pub fn leaves_time_for(deadline: Option<Instant>, delay: Duration, now: Instant) -> bool {
    match deadline {
        None => true,
        Some(deadline) => now + delay < deadline,
    }
}

/// Deadline `budget` from now.
pub fn deadline_in(budget: Duration) -> Instant {
    Instant::now() + budget
}
