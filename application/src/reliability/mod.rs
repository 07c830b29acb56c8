//! Reliability layer: retries, circuit breakers and idempotency.
//!
//! | Component | Role |
//! |-----------|------|
//! | [`RetryManager`] | re-runs retryable failures with backoff |
//! | [`CircuitBreakerRegistry`] | per-provider breakers |
//! | [`InMemoryIdempotencyStore`] | replays completed runs by key |
//! | [`ReliabilityManager`] | composes the three for the orchestrator |

pub mod breakers;
pub mod idempotency;
pub mod manager;
pub mod retry;

pub use breakers::CircuitBreakerRegistry;
pub use idempotency::InMemoryIdempotencyStore;
pub use manager::{ReliabilityConfig, ReliabilityManager};
pub use retry::{RetryManager, RetryOutcome};
