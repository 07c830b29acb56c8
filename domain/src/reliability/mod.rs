//! Reliability primitives
//!
//! Pure building blocks of the reliability layer. The stateful, concurrent
//! wrappers (breaker registry, retry executor, idempotency store) live in the
//! application layer and delegate their decisions to these types.
//!
//! - [`classify`] - error → category + retry verdict
//! - [`circuit`] - per-key breaker state machine
//! - [`retry`] - attempt limit and backoff schedule

pub mod circuit;
pub mod classify;
pub mod retry;

pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Rejection};
pub use classify::{Classification, ErrorCategory, ErrorClassifier};
pub use retry::RetryPolicy;
