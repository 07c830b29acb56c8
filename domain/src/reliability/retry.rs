//! Retry policy: attempt limits and backoff schedule.
//!
//! The schedule is exponential, `initial_delay * multiplier^(n-1)` for the
//! n-th retry, capped at `max_delay`. Jitter is applied as a symmetric
//! fraction of the base delay and the result is capped again, so the jittered
//! delay never exceeds `max_delay` either. A provider's retry-after hint
//! replaces the computed delay entirely.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Fraction of the base delay used as jitter amplitude (0.0 - 1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Un-jittered delay before the `retry`-th retry (1-based).
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay before the `retry`-th retry with jitter applied.
    ///
    /// `sample` is a uniform value in `[-1.0, 1.0]` supplied by the caller.
    pub fn jittered_delay(&self, retry: u32, sample: f64) -> Duration {
        let base = self.base_delay(retry).as_millis() as f64;
        let spread = base * self.jitter * sample.clamp(-1.0, 1.0);
        let millis = (base + spread).clamp(0.0, self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Delay to sleep before the `retry`-th retry.
    ///
    /// A retry-after hint overrides the schedule and is honoured even when it
    /// is longer than `max_delay`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>, sample: f64) -> Duration {
        match retry_after {
            Some(hint) => hint,
            None => self.jittered_delay(retry, sample),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(6)
            .with_initial_delay(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_millis(1000))
            .with_jitter(0.0)
    }

    #[test]
    fn test_exponential_schedule_is_capped() {
        let p = policy();
        let delays: Vec<u64> = (1..=6).map(|n| p.base_delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_schedule_non_decreasing() {
        let p = policy();
        let delays: Vec<Duration> = (1..20).map(|n| p.base_delay(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= p.max_delay));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy().with_jitter(0.5);
        assert_eq!(p.jittered_delay(1, 1.0), Duration::from_millis(150));
        assert_eq!(p.jittered_delay(1, -1.0), Duration::from_millis(50));
        // jitter never pushes past the cap
        assert_eq!(p.jittered_delay(10, 1.0), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_after_overrides() {
        let p = policy();
        let hint = Duration::from_secs(5);
        assert_eq!(p.delay_for(1, Some(hint), 0.0), hint);
        assert_eq!(p.delay_for(1, None, 0.0), Duration::from_millis(100));
    }

    #[test]
    fn test_allows_another() {
        let p = RetryPolicy::default().with_max_attempts(3);
        assert!(p.allows_another(1));
        assert!(p.allows_another(2));
        assert!(!p.allows_another(3));
        assert!(!RetryPolicy::none().allows_another(1));
    }

    #[test]
    fn test_huge_retry_number_does_not_overflow() {
        let p = policy();
        assert_eq!(p.base_delay(u32::MAX), Duration::from_millis(1000));
    }
}
