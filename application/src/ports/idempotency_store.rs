//! Idempotency storage port
//!
//! In-memory storage is the reference implementation
//! ([`crate::reliability::idempotency::InMemoryIdempotencyStore`]); durable
//! backends plug in by implementing this trait.

use orchestra_domain::{IdempotencyCheck, OrchestrationOutput};

/// Deduplicates runs by idempotency key.
///
/// Protocol: `check_or_reserve` → on `Miss` the caller owns the key and must
/// end with either `store` (success) or `release` (failure).
pub trait IdempotencyStore: Send + Sync {
    fn check_or_reserve(
        &self,
        key: &str,
        payload_fingerprint: &str,
    ) -> IdempotencyCheck<OrchestrationOutput>;

    /// Record the result for a reserved key. A completed record is never
    /// replaced.
    fn store(&self, key: &str, result: OrchestrationOutput);

    /// Drop an unfinished reservation so the key can be retried.
    fn release(&self, key: &str);
}
