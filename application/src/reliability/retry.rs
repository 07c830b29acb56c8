//! Retry executor
//!
//! Runs an operation under a [`RetryPolicy`], consulting the
//! [`ErrorClassifier`] after every failure. Only retryable categories are
//! retried; a provider's retry-after hint replaces the computed backoff.

use orchestra_domain::{Classification, ErrorClassifier, RetryPolicy, ToolError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// What happened while executing with retries
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ToolError>,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Delays slept between attempts
    pub delays: Vec<Duration>,
    /// Verdict on the last failure, if any
    pub classification: Option<Classification>,
}

impl<T> RetryOutcome<T> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

pub struct RetryManager {
    policy: RetryPolicy,
    classifier: ErrorClassifier,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), ErrorClassifier::default())
    }
}

impl RetryManager {
    pub fn new(policy: RetryPolicy, classifier: ErrorClassifier) -> Self {
        Self { policy, classifier }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Execute with the manager's own policy.
    pub async fn execute<T, F, Fut>(&self, op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ToolError>>,
    {
        self.execute_with_retry(op, &self.policy).await
    }

    /// Execute `op` (called with the 1-based attempt number) under `policy`.
    ///
    /// The error returned after the last attempt is the operation's own
    /// error, annotated with the number of attempts made.
    pub async fn execute_with_retry<T, F, Fut>(&self, mut op: F, policy: &RetryPolicy) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ToolError>>,
    {
        let mut attempts = 0u32;
        let mut delays = Vec::new();

        loop {
            attempts += 1;
            let error = match op(attempts).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                        delays,
                        classification: None,
                    };
                }
                Err(e) => e,
            };

            let verdict = self.classifier.classify(&error);
            if !verdict.retryable || !policy.allows_another(attempts) {
                if verdict.retryable {
                    warn!(attempts, error = %error, "Retries exhausted");
                } else {
                    debug!(category = %verdict.category, error = %error, "Not retrying");
                }
                return RetryOutcome {
                    result: Err(error.with_attempts(attempts)),
                    attempts,
                    delays,
                    classification: Some(verdict),
                };
            }

            let sample: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            let delay = policy.delay_for(attempts, verdict.retry_after, sample);
            debug!(
                attempt = attempts,
                category = %verdict.category,
                delay_ms = delay.as_millis() as u64,
                "Retrying after failure"
            );
            delays.push(delay);
            tokio::time::sleep(delay).await;
        }
    }
}
