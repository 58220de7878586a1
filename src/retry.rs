//! Retry policy shared by the connector and the store health gate.
//!
//! Delays grow exponentially from a base, cap at a maximum, and carry a
//! small uniform jitter so that a fleet of bridges restarting together does
//! not hammer the broker in lockstep.

use std::time::Duration;

use rand::Rng;

/// Fraction of the computed delay used as the jitter upper bound.
const JITTER_FRACTION: f64 = 0.1;

/// Exponential backoff policy with a cap and uniform jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts before giving up.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on the computed delay (jitter excluded).
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay for a 1-based attempt index:
    /// `min(max_delay, base_delay * 2^(attempt-1))`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let scaled = self.base_delay.saturating_mul(2u32.saturating_pow(exponent));
        scaled.min(self.max_delay)
    }

    /// Delay for an attempt plus uniform jitter in `[0, 0.1 * delay]`.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        let jitter_max = delay.as_secs_f64() * JITTER_FRACTION;
        if jitter_max <= 0.0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=jitter_max);
        delay + Duration::from_secs_f64(jitter)
    }

    /// Whether another attempt is allowed after `attempt` attempts have run.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_millis(max_ms),
        }
    }

    #[test]
    fn delay_doubles_per_attempt_until_cap() {
        let p = policy(1000, 30_000);
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(3), Duration::from_secs(4));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(5), Duration::from_secs(16));
        assert_eq!(p.delay_for(6), Duration::from_secs(30));
        assert_eq!(p.delay_for(7), Duration::from_secs(30));
    }

    #[test]
    fn delay_sequence_is_non_decreasing_and_capped() {
        let p = policy(250, 5_000);
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = p.delay_for(attempt);
            assert!(delay >= previous, "delay shrank at attempt {attempt}");
            assert!(delay <= p.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn huge_attempt_index_does_not_overflow() {
        let p = policy(1000, 30_000);
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_is_bounded_by_ten_percent() {
        let p = policy(1000, 30_000);
        for attempt in 1..=6 {
            let bare = p.delay_for(attempt);
            for _ in 0..50 {
                let jittered = p.delay_with_jitter(attempt);
                assert!(jittered >= bare);
                assert!(jittered.as_secs_f64() <= bare.as_secs_f64() * 1.1 + 1e-9);
            }
        }
    }

    #[test]
    fn exhaustion_counts_attempts_inclusively() {
        let p = policy(100, 1_000);
        assert!(!p.exhausted(9));
        assert!(p.exhausted(10));
        assert!(p.exhausted(11));
    }
}
