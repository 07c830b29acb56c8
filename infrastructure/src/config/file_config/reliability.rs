//! Reliability configuration from TOML (`[retry]`, `[circuit_breaker]`,
//! `[idempotency]` sections)
//!
//! Example configuration:
//!
//! ```toml
//! [retry]
//! max_attempts = 4
//! initial_delay_ms = 100
//!
//! [retry.patterns]
//! rate_limit = ["slow down", "quota"]
//!
//! [circuit_breaker]
//! failure_threshold = 3
//! timeout_ms = 10000
//!
//! [idempotency]
//! ttl_secs = 600
//! sliding_ttl = true
//! ```

use orchestra_domain::{CircuitBreakerConfig, ErrorCategory, ErrorClassifier, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Raw retry configuration from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRetryConfig {
    /// Total attempts including the first call
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    /// Extra message substrings per error category, added to the built-in table
    pub patterns: BTreeMap<String, Vec<String>>,
}

impl Default for FileRetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            multiplier: policy.multiplier,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter: policy.jitter,
            patterns: BTreeMap::new(),
        }
    }
}

impl FileRetryConfig {
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_multiplier(self.multiplier)
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(self.jitter)
    }

    /// Default classifier extended with the configured patterns.
    ///
    /// Unknown category names are skipped with a warning; `validate` reports
    /// them as errors.
    pub fn to_classifier(&self) -> ErrorClassifier {
        let mut classifier = ErrorClassifier::default();
        for (name, needles) in &self.patterns {
            match name.parse::<ErrorCategory>() {
                Ok(category) => {
                    let needles: Vec<&str> = needles.iter().map(String::as_str).collect();
                    classifier = classifier.with_patterns(category, &needles);
                }
                Err(e) => warn!("retry.patterns: {}", e),
            }
        }
        classifier
    }
}

/// Raw circuit breaker configuration from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileCircuitBreakerConfig {
    pub failure_threshold: u32,
    pub window_ms: u64,
    pub timeout_ms: u64,
    pub success_threshold: u32,
    pub half_open_max_calls: u32,
}

impl Default for FileCircuitBreakerConfig {
    fn default() -> Self {
        let config = CircuitBreakerConfig::default();
        Self {
            failure_threshold: config.failure_threshold,
            window_ms: config.window.as_millis() as u64,
            timeout_ms: config.timeout.as_millis() as u64,
            success_threshold: config.success_threshold,
            half_open_max_calls: config.half_open_max_calls,
        }
    }
}

impl FileCircuitBreakerConfig {
    pub fn to_circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::default()
            .with_failure_threshold(self.failure_threshold)
            .with_window(Duration::from_millis(self.window_ms))
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_success_threshold(self.success_threshold)
            .with_half_open_max_calls(self.half_open_max_calls)
    }
}

/// Raw idempotency configuration from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileIdempotencyConfig {
    pub ttl_secs: u64,
    /// Maximum number of tracked keys
    pub capacity: usize,
    /// Refresh a record's TTL on every replay
    pub sliding_ttl: bool,
}

impl Default for FileIdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 15 * 60,
            capacity: 1000,
            sliding_ttl: false,
        }
    }
}
