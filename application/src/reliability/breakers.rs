//! Circuit breakers keyed by provider (or tool name).
//!
//! The registry owns the lock; callers only see decisions and states. Time is
//! read from tokio's clock so paused-time tests drive the breaker timeouts.

use orchestra_domain::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Rejection};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask to make a call through `key`'s breaker.
    pub fn try_acquire(&self, key: &str) -> Result<(), Rejection> {
        let mut breakers = self.lock();
        let breaker = breakers
            .entry(key.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config));
        let before = breaker.state();
        let result = breaker.try_acquire(now());
        if breaker.state() != before {
            info!(key, from = %before, to = %breaker.state(), "Circuit transition");
        }
        result
    }

    /// Admit a call and hand back a permit that settles it.
    ///
    /// A permit dropped without being settled gives its probe slot back, so a
    /// cancelled half-open call cannot leave the breaker without probes.
    pub fn acquire(&self, key: &str) -> Result<BreakerPermit<'_>, Rejection> {
        self.try_acquire(key)?;
        Ok(BreakerPermit {
            registry: self,
            key: key.to_string(),
            settled: false,
        })
    }

    pub fn record_success(&self, key: &str) {
        let mut breakers = self.lock();
        if let Some(breaker) = breakers.get_mut(key) {
            let before = breaker.state();
            breaker.record_success(now());
            if breaker.state() != before {
                info!(key, from = %before, to = %breaker.state(), "Circuit transition");
            }
        }
    }

    pub fn record_failure(&self, key: &str) {
        let mut breakers = self.lock();
        let breaker = breakers
            .entry(key.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config));
        let before = breaker.state();
        breaker.record_failure(now());
        if breaker.state() != before {
            warn!(key, from = %before, to = %breaker.state(), "Circuit transition");
        }
    }

    /// Give back a probe slot for a call that says nothing about health.
    pub fn release(&self, key: &str) {
        if let Some(breaker) = self.lock().get_mut(key) {
            breaker.release();
        }
    }

    /// State as a caller would experience it right now. Read only.
    pub fn state(&self, key: &str) -> CircuitState {
        self.lock()
            .get(key)
            .map(|b| b.effective_state(now()))
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self) -> BTreeMap<String, CircuitState> {
        let now = now();
        self.lock()
            .iter()
            .map(|(key, b)| (key.clone(), b.effective_state(now)))
            .collect()
    }

    /// Failures currently inside the rolling window for `key`
    pub fn failure_count(&self, key: &str) -> usize {
        self.lock()
            .get(key)
            .map(|b| b.failure_count(now()))
            .unwrap_or(0)
    }
}

/// An admitted call through one breaker.
///
/// Exactly one of `success`, `failure` or `release` reaches the breaker;
/// dropping the permit unsettled counts as `release`.
pub struct BreakerPermit<'a> {
    registry: &'a CircuitBreakerRegistry,
    key: String,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn success(mut self) {
        self.settled = true;
        self.registry.record_success(&self.key);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.registry.record_failure(&self.key);
    }

    /// Settle without a health signal (cancellation, invalid input).
    pub fn release(mut self) {
        self.settled = true;
        self.registry.release(&self.key);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(key = %self.key, "Unsettled breaker permit released");
            self.registry.release(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(2)
                .with_timeout(Duration::from_secs(30))
                .with_success_threshold(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_isolated() {
        let breakers = registry();
        breakers.record_failure("alpha");
        breakers.record_failure("alpha");
        assert_eq!(breakers.state("alpha"), CircuitState::Open);
        assert_eq!(breakers.state("beta"), CircuitState::Closed);
        assert!(breakers.try_acquire("beta").is_ok());
        assert!(matches!(
            breakers.try_acquire("alpha"),
            Err(Rejection::Open { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_moves_to_half_open_then_closed() {
        let breakers = registry();
        breakers.record_failure("alpha");
        breakers.record_failure("alpha");

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(breakers.state("alpha"), CircuitState::HalfOpen);

        breakers.try_acquire("alpha").unwrap();
        assert!(matches!(
            breakers.try_acquire("alpha"),
            Err(Rejection::ProbesExhausted)
        ));
        breakers.record_success("alpha");
        assert_eq!(breakers.state("alpha"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reports_every_key() {
        let breakers = registry();
        breakers.try_acquire("alpha").unwrap();
        breakers.record_failure("beta");
        breakers.record_failure("beta");
        let snapshot = breakers.snapshot();
        assert_eq!(snapshot.get("alpha"), Some(&CircuitState::Closed));
        assert_eq!(snapshot.get("beta"), Some(&CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_permit_returns_probe_slot() {
        let breakers = registry();
        breakers.record_failure("alpha");
        breakers.record_failure("alpha");
        tokio::time::advance(Duration::from_secs(31)).await;

        let permit = breakers.acquire("alpha").unwrap();
        assert!(matches!(
            breakers.acquire("alpha"),
            Err(Rejection::ProbesExhausted)
        ));
        drop(permit);

        let permit = breakers.acquire("alpha").unwrap();
        assert_eq!(permit.key(), "alpha");
        permit.success();
        assert_eq!(breakers.state("alpha"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_permit_is_not_released_twice() {
        let breakers = registry();
        breakers.record_failure("alpha");
        breakers.record_failure("alpha");
        tokio::time::advance(Duration::from_secs(31)).await;

        breakers.acquire("alpha").unwrap().failure();
        assert_eq!(breakers.state("alpha"), CircuitState::Open);
    }
}
