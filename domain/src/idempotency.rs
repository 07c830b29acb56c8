//! Idempotency value types
//!
//! A request is identified by a caller-chosen key plus a fingerprint of what
//! it asks for. The same key with a different fingerprint is a conflict, never
//! an overwrite.

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::time::Instant;

/// SHA-256 (hex) over the canonical JSON of tool name, options and payload.
///
/// Object keys are sorted recursively, so semantically equal payloads hash the
/// same regardless of key order.
pub fn payload_fingerprint(tool: Option<&str>, options: &Value, payload: &Value) -> String {
    let envelope = json!({
        "tool": tool,
        "options": canonicalize(options),
        "payload": canonicalize(payload),
    });
    let mut hasher = Sha256::new();
    hasher.update(envelope.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Stored outcome for a key
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord<T> {
    pub key: String,
    pub payload_fingerprint: String,
    pub result: T,
    pub expires_at: Instant,
}

impl<T> IdempotencyRecord<T> {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Answer to `check_or_reserve`
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyCheck<T> {
    /// Same key, same fingerprint, finished: replay the stored result
    Hit(T),
    /// Unknown or expired key; the caller now holds the reservation
    Miss,
    /// Same key, different fingerprint
    Conflict { stored_fingerprint: String },
    /// Same key and fingerprint, still executing elsewhere
    InProgress,
}

impl<T> IdempotencyCheck<T> {
    pub fn is_miss(&self) -> bool {
        matches!(self, IdempotencyCheck::Miss)
    }
}
