//! In-memory idempotency store with TTL and LRU eviction.
//!
//! A key moves through `Reserved` (a run owns it) to `Completed` (the result
//! is replayable). Both states expire after the TTL; LRU pressure evicts the
//! least recently touched key regardless of state.

use crate::ports::idempotency_store::IdempotencyStore;
use lru::LruCache;
use orchestra_domain::{IdempotencyCheck, IdempotencyRecord, OrchestrationOutput};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default record lifetime
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Default maximum number of tracked keys
pub const DEFAULT_CAPACITY: usize = 1000;

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

#[derive(Debug, Clone)]
enum Entry {
    Reserved {
        fingerprint: String,
        expires_at: Instant,
    },
    Completed(IdempotencyRecord<OrchestrationOutput>),
}

impl Entry {
    fn fingerprint(&self) -> &str {
        match self {
            Entry::Reserved { fingerprint, .. } => fingerprint,
            Entry::Completed(record) => &record.payload_fingerprint,
        }
    }

    fn expires_at(&self) -> Instant {
        match self {
            Entry::Reserved { expires_at, .. } => *expires_at,
            Entry::Completed(record) => record.expires_at,
        }
    }
}

pub struct InMemoryIdempotencyStore {
    cache: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
    /// Refresh a record's TTL every time it is replayed
    sliding: bool,
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}

impl InMemoryIdempotencyStore {
    /// * `capacity` - maximum number of keys tracked (at least 1)
    /// * `ttl` - lifetime of reservations and records
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            ttl,
            sliding: false,
        }
    }

    pub fn with_sliding_ttl(mut self, sliding: bool) -> Self {
        self.sliding = sliding;
        self
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove every expired entry; returns how many were dropped.
    pub fn prune_expired(&self) -> usize {
        let now = now();
        let mut cache = self.lock();
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            cache.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn check_or_reserve(
        &self,
        key: &str,
        payload_fingerprint: &str,
    ) -> IdempotencyCheck<OrchestrationOutput> {
        let now = now();
        let mut cache = self.lock();

        if let Some(entry) = cache.get_mut(key) {
            if now < entry.expires_at() {
                if entry.fingerprint() != payload_fingerprint {
                    return IdempotencyCheck::Conflict {
                        stored_fingerprint: entry.fingerprint().to_string(),
                    };
                }
                return match entry {
                    Entry::Reserved { .. } => IdempotencyCheck::InProgress,
                    Entry::Completed(record) => {
                        if self.sliding {
                            record.expires_at = now + self.ttl;
                        }
                        IdempotencyCheck::Hit(record.result.clone())
                    }
                };
            }
            debug!(key, "Idempotency entry expired");
            cache.pop(key);
        }

        cache.put(
            key.to_string(),
            Entry::Reserved {
                fingerprint: payload_fingerprint.to_string(),
                expires_at: now + self.ttl,
            },
        );
        IdempotencyCheck::Miss
    }

    fn store(&self, key: &str, result: OrchestrationOutput) {
        let now = now();
        let mut cache = self.lock();
        let fingerprint = match cache.peek(key) {
            Some(Entry::Reserved { fingerprint, .. }) => fingerprint.clone(),
            Some(Entry::Completed(_)) => {
                debug!(key, "Idempotency record already written, keeping it");
                return;
            }
            None => {
                debug!(key, "Reservation evicted before completion, not storing");
                return;
            }
        };
        cache.put(
            key.to_string(),
            Entry::Completed(IdempotencyRecord {
                key: key.to_string(),
                payload_fingerprint: fingerprint,
                result,
                expires_at: now + self.ttl,
            }),
        );
    }

    fn release(&self, key: &str) {
        let mut cache = self.lock();
        if matches!(cache.peek(key), Some(Entry::Reserved { .. })) {
            cache.pop(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_domain::{OutputMetadata, RunStatus, Usage};
    use serde_json::json;

    fn output(content: serde_json::Value) -> OrchestrationOutput {
        OrchestrationOutput {
            content,
            usage: Usage::default(),
            metadata: OutputMetadata::default(),
            trace_id: "t".into(),
            request_id: "r".into(),
            elapsed_ms: 1,
            status: RunStatus::Completed,
            errors: Default::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_store_hit() {
        let store = InMemoryIdempotencyStore::default();
        assert!(store.check_or_reserve("k", "fp").is_miss());
        store.store("k", output(json!({"v": 1})));

        match store.check_or_reserve("k", "fp") {
            IdempotencyCheck::Hit(out) => assert_eq!(out.content, json!({"v": 1})),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicting_fingerprint() {
        let store = InMemoryIdempotencyStore::default();
        store.check_or_reserve("k", "fp-a");
        store.store("k", output(json!(1)));
        assert_eq!(
            store.check_or_reserve("k", "fp-b"),
            IdempotencyCheck::Conflict {
                stored_fingerprint: "fp-a".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_progress_and_release() {
        let store = InMemoryIdempotencyStore::default();
        assert!(store.check_or_reserve("k", "fp").is_miss());
        assert_eq!(store.check_or_reserve("k", "fp"), IdempotencyCheck::InProgress);

        store.release("k");
        assert!(store.check_or_reserve("k", "fp").is_miss());
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_are_immutable() {
        let store = InMemoryIdempotencyStore::default();
        store.check_or_reserve("k", "fp");
        store.store("k", output(json!("first")));
        store.store("k", output(json!("second")));
        store.release("k");

        match store.check_or_reserve("k", "fp") {
            IdempotencyCheck::Hit(out) => assert_eq!(out.content, json!("first")),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = InMemoryIdempotencyStore::new(10, Duration::from_secs(60));
        store.check_or_reserve("k", "fp");
        store.store("k", output(json!(1)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.check_or_reserve("k", "other").is_miss());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_ttl_refreshes_on_hit() {
        let store =
            InMemoryIdempotencyStore::new(10, Duration::from_secs(60)).with_sliding_ttl(true);
        store.check_or_reserve("k", "fp");
        store.store("k", output(json!(1)));

        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(matches!(store.check_or_reserve("k", "fp"), IdempotencyCheck::Hit(_)));
        tokio::time::advance(Duration::from_secs(40)).await;
        assert!(matches!(store.check_or_reserve("k", "fp"), IdempotencyCheck::Hit(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction() {
        let store = InMemoryIdempotencyStore::new(2, Duration::from_secs(60));
        for key in ["a", "b", "c"] {
            store.check_or_reserve(key, "fp");
            store.store(key, output(json!(key)));
        }
        assert_eq!(store.len(), 2);
        // "a" was evicted, so it is a fresh miss
        assert!(store.check_or_reserve("a", "fp").is_miss());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_expired() {
        let store = InMemoryIdempotencyStore::new(10, Duration::from_secs(1));
        store.check_or_reserve("a", "fp");
        store.check_or_reserve("b", "fp");
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.prune_expired(), 2);
        assert!(store.is_empty());
    }
}
