//! Reliability manager
//!
//! Composes retry, circuit breaking and idempotency for the reliable
//! orchestrator. Every attempt asks the breaker for permission first; the
//! outcome of the attempt is then reported back according to its error
//! category:
//!
//! ```text
//! attempt ──► acquire(key) ──rejected──► CircuitOpen error (terminal)
//!                  │ permit (released if the attempt is dropped)
//!                  ▼
//!               op(attempt) ──Ok──► record_success
//!                  │ Err
//!                  ▼
//!        classify ── health signal? ──yes──► record_failure
//!                                    └─no──► release permit
//! ```

use super::breakers::CircuitBreakerRegistry;
use super::idempotency::{DEFAULT_CAPACITY, DEFAULT_TTL, InMemoryIdempotencyStore};
use super::retry::{RetryManager, RetryOutcome};
use crate::ports::idempotency_store::IdempotencyStore;
use orchestra_domain::{
    CircuitBreakerConfig, CircuitState, ErrorClassifier, Rejection, RetryPolicy, ToolError,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Settings for [`ReliabilityManager::from_config`]
#[derive(Debug, Clone, PartialEq)]
pub struct ReliabilityConfig {
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    pub idempotency_ttl: Duration,
    pub idempotency_capacity: usize,
    pub idempotency_sliding_ttl: bool,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            idempotency_ttl: DEFAULT_TTL,
            idempotency_capacity: DEFAULT_CAPACITY,
            idempotency_sliding_ttl: false,
        }
    }
}

impl ReliabilityConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    pub fn with_idempotency_capacity(mut self, capacity: usize) -> Self {
        self.idempotency_capacity = capacity;
        self
    }
}

pub struct ReliabilityManager {
    retry: RetryManager,
    breakers: CircuitBreakerRegistry,
    idempotency: Arc<dyn IdempotencyStore>,
}

impl Default for ReliabilityManager {
    fn default() -> Self {
        Self::from_config(&ReliabilityConfig::default())
    }
}

impl ReliabilityManager {
    pub fn new(
        retry: RetryManager,
        breakers: CircuitBreakerRegistry,
        idempotency: Arc<dyn IdempotencyStore>,
    ) -> Self {
        Self {
            retry,
            breakers,
            idempotency,
        }
    }

    /// Build a manager with the in-memory idempotency store.
    pub fn from_config(config: &ReliabilityConfig) -> Self {
        let store = InMemoryIdempotencyStore::new(config.idempotency_capacity, config.idempotency_ttl)
            .with_sliding_ttl(config.idempotency_sliding_ttl);
        Self::new(
            RetryManager::new(config.retry, ErrorClassifier::default()),
            CircuitBreakerRegistry::new(config.circuit_breaker),
            Arc::new(store),
        )
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.retry = RetryManager::new(*self.retry.policy(), classifier);
        self
    }

    pub fn retry(&self) -> &RetryManager {
        &self.retry
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn idempotency(&self) -> &Arc<dyn IdempotencyStore> {
        &self.idempotency
    }

    pub fn circuit_state(&self, key: &str) -> CircuitState {
        self.breakers.state(key)
    }

    pub fn circuit_snapshot(&self) -> BTreeMap<String, CircuitState> {
        self.breakers.snapshot()
    }

    /// Run `op` through `breaker_key`'s breaker with retries.
    pub async fn call<T, F, Fut>(&self, breaker_key: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ToolError>>,
    {
        let classifier = self.retry.classifier();
        self.retry
            .execute(|attempt| {
                let admitted = self.breakers.acquire(breaker_key);
                let call = admitted.is_ok().then(|| op(attempt));
                async move {
                    let (permit, call) = match (admitted, call) {
                        (Ok(permit), Some(call)) => (permit, call),
                        (admitted, _) => {
                            let retry_in = match admitted {
                                Err(Rejection::Open { retry_in }) => Some(retry_in),
                                _ => None,
                            };
                            debug!(key = breaker_key, ?retry_in, "Call rejected by circuit breaker");
                            return Err(ToolError::circuit_open(breaker_key));
                        }
                    };
                    // dropping this future before the call settles drops the
                    // permit, which hands the probe slot back
                    match call.await {
                        Ok(value) => {
                            permit.success();
                            Ok(value)
                        }
                        Err(error) => {
                            if classifier.classify(&error).category.counts_against_breaker() {
                                permit.failure();
                            } else {
                                permit.release();
                            }
                            Err(error)
                        }
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_domain::ToolErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager(failure_threshold: u32, max_attempts: u32) -> ReliabilityManager {
        ReliabilityManager::from_config(
            &ReliabilityConfig::default()
                .with_retry(
                    RetryPolicy::default()
                        .with_max_attempts(max_attempts)
                        .with_initial_delay(Duration::from_millis(10))
                        .with_jitter(0.0),
                )
                .with_circuit_breaker(
                    CircuitBreakerConfig::default()
                        .with_failure_threshold(failure_threshold)
                        .with_timeout(Duration::from_secs(30))
                        .with_success_threshold(1),
                ),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_open_the_breaker() {
        let manager = manager(2, 1);
        for _ in 0..2 {
            let outcome: RetryOutcome<()> = manager
                .call("acme", |_| async { Err(ToolError::backend("503 service unavailable")) })
                .await;
            assert!(outcome.result.is_err());
        }
        assert_eq!(manager.circuit_state("acme"), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = manager
            .call("acme", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert_eq!(outcome.result.unwrap_err().kind, ToolErrorKind::CircuitOpen);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_closes_on_success() {
        let manager = manager(1, 1);
        let _: RetryOutcome<()> = manager
            .call("acme", |_| async { Err(ToolError::timeout("generate")) })
            .await;
        assert_eq!(manager.circuit_state("acme"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(manager.circuit_state("acme"), CircuitState::HalfOpen);

        let outcome = manager.call("acme", |_| async { Ok(5) }).await;
        assert_eq!(outcome.result.unwrap(), 5);
        assert_eq!(manager.circuit_state("acme"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_input_does_not_trip_breaker() {
        let manager = manager(1, 3);
        let outcome: RetryOutcome<()> = manager
            .call("acme", |_| async { Err(ToolError::invalid_input("bad prompt")) })
            .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(manager.circuit_state("acme"), CircuitState::Closed);
        assert_eq!(manager.breakers().failure_count("acme"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_stop_when_breaker_opens_mid_run() {
        let manager = manager(2, 5);
        let calls = AtomicU32::new(0);
        let outcome: RetryOutcome<()> = manager
            .call("acme", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ToolError::backend("502 bad gateway")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap_err().kind, ToolErrorKind::CircuitOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_half_open_probe_frees_its_slot() {
        let manager = manager(1, 1);
        let _: RetryOutcome<()> = manager
            .call("acme", |_| async { Err(ToolError::backend("503 service unavailable")) })
            .await;
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(manager.circuit_state("acme"), CircuitState::HalfOpen);

        // the probe hangs and its caller gives up
        let hung = tokio::time::timeout(
            Duration::from_millis(50),
            manager.call("acme", |_| std::future::pending::<Result<(), ToolError>>()),
        )
        .await;
        assert!(hung.is_err());

        let outcome = manager.call("acme", |_| async { Ok(9) }).await;
        assert_eq!(outcome.result.unwrap(), 9);
        assert_eq!(manager.circuit_state("acme"), CircuitState::Closed);
    }
}
