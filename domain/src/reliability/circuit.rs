//! Circuit breaker state machine.
//!
//! ```text
//!              failures >= threshold within window
//!   ┌────────┐ ─────────────────────────────────▶ ┌────────┐
//!   │ CLOSED │                                    │  OPEN  │◀─┐
//!   └────────┘ ◀──────┐                           └────────┘  │
//!                     │ consecutive successes         │       │ any failure
//!                     │ >= success_threshold          │ timeout elapsed,
//!                     │                               ▼ next call
//!                     └──────────────────────── ┌───────────┐
//!                                               │ HALF_OPEN │
//!                                               └───────────┘
//! ```
//!
//! All mutation goes through [`CircuitBreaker::try_acquire`],
//! [`CircuitBreaker::record_success`] and [`CircuitBreaker::record_failure`].
//! Every method takes the current [`Instant`] explicitly so the machine stays
//! free of clocks and can be driven deterministically.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally, failures are counted
    Closed,
    /// Calls are rejected without being attempted
    Open,
    /// A limited number of probe calls are allowed through
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CircuitState::Open)
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Thresholds and timings for a breaker
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures within `window` that open the circuit
    pub failure_threshold: u32,
    /// Rolling window for counting failures
    pub window: Duration,
    /// How long the circuit stays open before probing
    pub timeout: Duration,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// Concurrent probe calls allowed while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            success_threshold: 2,
            half_open_max_calls: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls.max(1);
        self
    }
}

/// Why a call was not let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Circuit is open; `retry_in` is the time left until probing
    Open { retry_in: Duration },
    /// Half-open probe slots are all taken
    ProbesExhausted,
}

/// Per-key breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: VecDeque<Instant>,
    consecutive_successes: u32,
    probes_in_flight: u32,
    opened_at: Option<Instant>,
    last_transition: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            consecutive_successes: 0,
            probes_in_flight: 0,
            opened_at: None,
            last_transition: None,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Stored state, as of the last transition
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// State the next call would observe.
    ///
    /// An open breaker whose timeout has elapsed reports `HalfOpen`, since
    /// the next call will be let through as a probe. Nothing is mutated.
    pub fn effective_state(&self, now: Instant) -> CircuitState {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened)) if now.duration_since(opened) >= self.config.timeout => {
                CircuitState::HalfOpen
            }
            (state, _) => state,
        }
    }

    /// Failures currently inside the rolling window
    pub fn failure_count(&self, now: Instant) -> usize {
        self.failures
            .iter()
            .filter(|t| now.duration_since(**t) < self.config.window)
            .count()
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn last_transition(&self) -> Option<Instant> {
        self.last_transition
    }

    /// Ask permission to make a call.
    ///
    /// Moves `Open → HalfOpen` once the timeout has elapsed and reserves a
    /// probe slot while half-open.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Rejection> {
        if self.state == CircuitState::Open {
            let opened = self.opened_at.unwrap_or(now);
            let elapsed = now.duration_since(opened);
            if elapsed < self.config.timeout {
                return Err(Rejection::Open {
                    retry_in: self.config.timeout - elapsed,
                });
            }
            self.transition(CircuitState::HalfOpen, now);
        }

        if self.state == CircuitState::HalfOpen {
            if self.probes_in_flight >= self.config.half_open_max_calls {
                return Err(Rejection::ProbesExhausted);
            }
            self.probes_in_flight += 1;
        }

        Ok(())
    }

    pub fn record_success(&mut self, now: Instant) {
        match self.state {
            CircuitState::Closed => {
                self.prune(now);
            }
            CircuitState::HalfOpen => {
                self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
                self.consecutive_successes += 1;
                if self.consecutive_successes >= self.config.success_threshold {
                    self.transition(CircuitState::Closed, now);
                }
            }
            // Only possible for a call admitted before the circuit opened
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&mut self, now: Instant) {
        match self.state {
            CircuitState::Closed => {
                self.failures.push_back(now);
                self.prune(now);
                if self.failures.len() as u32 >= self.config.failure_threshold {
                    self.transition(CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(CircuitState::Open, now);
            }
            CircuitState::Open => {}
        }
    }

    /// Release a probe slot without counting the call either way.
    ///
    /// Used when an admitted call ended for reasons unrelated to backend
    /// health (cancellation, invalid input).
    pub fn release(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.failures.front() {
            if now.duration_since(*front) >= self.config.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) {
        self.state = to;
        self.last_transition = Some(now);
        self.consecutive_successes = 0;
        self.probes_in_flight = 0;
        match to {
            CircuitState::Open => {
                self.opened_at = Some(now);
                self.failures.clear();
            }
            CircuitState::HalfOpen => {}
            CircuitState::Closed => {
                self.opened_at = None;
                self.failures.clear();
            }
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
