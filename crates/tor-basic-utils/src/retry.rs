//! A simple exponential-backoff-with-jitter delay generator.
//!
//! Used by anything that retries a failed operation (like fetching a
//! directory document from a cache) and wants successive attempts to
//! spread out over time instead of hammering the same few seconds.

use rand::Rng;
use std::time::Duration;

/// Generates a increasing sequence of delays, each one randomized
/// within a range that grows on every call to [`next_delay`](RetryDelay::next_delay).
///
/// The sequence is deterministic given the same `Rng` draws: each
/// delay is chosen uniformly from `[0, 2^n * low_bound)`, where `n` is
/// the number of previous calls, capped so the range never exceeds
/// about sixteen times the initial bound.
#[derive(Clone, Debug)]
pub struct RetryDelay {
    /// Current doubling exponent, capped to avoid overflow.
    doublings: u32,
    /// The base delay unit; the final range is `low_bound << doublings`.
    low_bound: Duration,
}

/// Doublings beyond this stop increasing the range further.
const MAX_DOUBLINGS: u32 = 16;

impl RetryDelay {
    /// Create a new `RetryDelay` whose first delay is chosen from
    /// `[0, low_bound)`.
    pub fn from_duration(low_bound: Duration) -> Self {
        RetryDelay {
            doublings: 0,
            low_bound: low_bound.max(Duration::from_millis(1)),
        }
    }

    /// Return the next delay in the sequence, and advance the
    /// generator so that the following call returns a delay chosen
    /// from a (generally larger) range.
    pub fn next_delay<R: Rng>(&mut self, rng: &mut R) -> Duration {
        let max = self.low_bound.saturating_mul(1 << self.doublings);
        self.doublings = (self.doublings + 1).min(MAX_DOUBLINGS);
        if max.is_zero() {
            return Duration::from_millis(0);
        }
        let max_msec = max.as_millis().min(u64::MAX as u128) as u64;
        let chosen = rng.gen_range(0..=max_msec.max(1));
        Duration::from_millis(chosen)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delays_grow_over_time() {
        let mut rng = rand::thread_rng();
        let mut d = RetryDelay::from_duration(Duration::from_secs(1));
        let mut prev_bound = Duration::from_secs(1);
        for _ in 0..5 {
            let delay = d.next_delay(&mut rng);
            assert!(delay <= prev_bound.saturating_mul(2) + Duration::from_secs(1));
            prev_bound = prev_bound.saturating_mul(2);
        }
    }
}
