//! Exponential backoff with optional jitter.

use rand::Rng;
use std::time::Duration;

/// Delay to wait after the `attempt`-th failed attempt (1-based).
///
/// `base_ms * 2^(attempt-1)`, capped at `max_ms`. With `jitter`, up to 10% is added.
///
/// Jitter is off unless `retries.jitter` is set, so the default schedule is exactly
/// 100, 200, 400 ms and retry timing is reproducible against a deadline.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64, jitter: bool) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    let jitter_ms = if jitter && capped_delay >= 10 {
        rand::thread_rng().gen_range(0..capped_delay / 10)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(calculate_backoff(1, 100, 2000, false), Duration::from_millis(100));
        assert_eq!(calculate_backoff(2, 100, 2000, false), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, 100, 2000, false), Duration::from_millis(400));
        assert_eq!(calculate_backoff(10, 100, 1000, false), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(0, 100, 1000, false), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        for _ in 0..50 {
            let d = calculate_backoff(2, 100, 2000, true).as_millis();
            assert!((200..220).contains(&d), "got {}", d);
        }
    }
}
