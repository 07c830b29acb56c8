//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! They are deserialized directly and converted into domain and application
//! types by the `to_*` helpers.

mod bundle;
mod events;
mod orchestration;
mod planner;
mod reliability;

pub use bundle::FileBundleConfig;
pub use events::FileEventsConfig;
pub use orchestration::FileOrchestrationConfig;
pub use planner::FilePlannerConfig;
pub use reliability::{FileCircuitBreakerConfig, FileIdempotencyConfig, FileRetryConfig};

use orchestra_application::{OrchestratorSettings, ReliabilityConfig};
use orchestra_domain::ErrorCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigValidationError {
    #[error("retry.max_attempts cannot be 0")]
    ZeroAttempts,

    #[error("retry.multiplier must be at least 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("retry.jitter must be within 0.0..=1.0, got {0}")]
    InvalidJitter(f64),

    #[error("retry.patterns: {0}")]
    UnknownCategory(String),

    #[error("circuit_breaker.{0} cannot be 0")]
    ZeroBreakerSetting(&'static str),

    #[error("idempotency.capacity cannot be 0")]
    ZeroCapacity,

    #[error("bundle.k cannot be 0")]
    ZeroReplicas,

    #[error("bundle.epsilon must be non-negative, got {0}")]
    NegativeEpsilon(f64),

    #[error("bundle.max_parallel cannot be 0")]
    ZeroParallelism,

    #[error("orchestration.budget_enforcement: {0}")]
    InvalidBudgetEnforcement(String),

    #[error("orchestration.default_timeout_ms cannot be 0")]
    ZeroTimeout,

    #[error("planner rule name cannot be empty")]
    EmptyRuleName,
}

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Retry policy and classifier patterns
    pub retry: FileRetryConfig,
    /// Per-backend circuit breakers
    pub circuit_breaker: FileCircuitBreakerConfig,
    /// Idempotency store sizing
    pub idempotency: FileIdempotencyConfig,
    /// Default bundle options
    pub bundle: FileBundleConfig,
    /// Orchestrator behavior
    pub orchestration: FileOrchestrationConfig,
    /// Planning rules
    pub planner: FilePlannerConfig,
    /// Lifecycle event output
    pub events: FileEventsConfig,
    /// Output schemas: uri -> JSON file
    pub schemas: BTreeMap<String, PathBuf>,
}

impl FileConfig {
    /// Validate the configuration, stopping at the first problem.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigValidationError::ZeroAttempts);
        }
        if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
            return Err(ConfigValidationError::InvalidMultiplier(retry.multiplier));
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(ConfigValidationError::InvalidJitter(retry.jitter));
        }
        for name in retry.patterns.keys() {
            name.parse::<ErrorCategory>()
                .map_err(ConfigValidationError::UnknownCategory)?;
        }

        let breaker = &self.circuit_breaker;
        for (field, value) in [
            ("failure_threshold", breaker.failure_threshold),
            ("success_threshold", breaker.success_threshold),
            ("half_open_max_calls", breaker.half_open_max_calls),
        ] {
            if value == 0 {
                return Err(ConfigValidationError::ZeroBreakerSetting(field));
            }
        }

        if self.idempotency.capacity == 0 {
            return Err(ConfigValidationError::ZeroCapacity);
        }

        if self.bundle.k == 0 {
            return Err(ConfigValidationError::ZeroReplicas);
        }
        if self.bundle.epsilon.is_nan() || self.bundle.epsilon < 0.0 {
            return Err(ConfigValidationError::NegativeEpsilon(self.bundle.epsilon));
        }
        if self.bundle.max_parallel == Some(0) {
            return Err(ConfigValidationError::ZeroParallelism);
        }

        self.orchestration
            .parse_budget_enforcement()
            .map_err(ConfigValidationError::InvalidBudgetEnforcement)?;
        if self.orchestration.default_timeout_ms == Some(0) {
            return Err(ConfigValidationError::ZeroTimeout);
        }

        if self.planner.rules.iter().any(|r| r.name.trim().is_empty()) {
            return Err(ConfigValidationError::EmptyRuleName);
        }

        Ok(())
    }

    pub fn to_reliability_config(&self) -> ReliabilityConfig {
        ReliabilityConfig {
            retry: self.retry.to_retry_policy(),
            circuit_breaker: self.circuit_breaker.to_circuit_breaker_config(),
            idempotency_ttl: Duration::from_secs(self.idempotency.ttl_secs),
            idempotency_capacity: self.idempotency.capacity,
            idempotency_sliding_ttl: self.idempotency.sliding_ttl,
        }
    }

    /// Orchestrator settings; an unparseable enforcement mode falls back to
    /// the default (`validate` reports it).
    pub fn to_orchestrator_settings(&self) -> OrchestratorSettings {
        let orchestration = &self.orchestration;
        OrchestratorSettings::default()
            .with_strict_conflict(orchestration.strict_conflict)
            .with_strict_budget(orchestration.strict_budget)
            .with_budget_enforcement(orchestration.parse_budget_enforcement().unwrap_or_default())
            .with_default_bundle(self.bundle.to_bundle_options())
            .with_default_timeout_ms(orchestration.default_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_application::BudgetEnforcement;

    #[test]
    fn test_deserialize_full_config() {
        let toml_str = r#"
[retry]
max_attempts = 5
initial_delay_ms = 100

[circuit_breaker]
failure_threshold = 3
timeout_ms = 5000

[idempotency]
ttl_secs = 60
capacity = 10

[bundle]
k = 5
epsilon = 0.1

[orchestration]
strict_budget = true
budget_enforcement = "preemptive"
default_timeout_ms = 2000

[planner]
default_tool = "echo"

[events]
jsonl_path = "events.jsonl"
redact_fields = ["api_key"]

[schemas]
"schema://answer" = "schemas/answer.json"
"#;

        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.bundle.k, 5);
        assert_eq!(config.events.jsonl_path, Some(PathBuf::from("events.jsonl")));
        assert_eq!(
            config.schemas.get("schema://answer"),
            Some(&PathBuf::from("schemas/answer.json"))
        );

        let reliability = config.to_reliability_config();
        assert_eq!(reliability.retry.max_attempts, 5);
        assert_eq!(reliability.circuit_breaker.timeout, Duration::from_secs(5));
        assert_eq!(reliability.idempotency_ttl, Duration::from_secs(60));
        assert_eq!(reliability.idempotency_capacity, 10);

        let settings = config.to_orchestrator_settings();
        assert!(settings.strict_budget);
        assert!(settings.strict_conflict);
        assert_eq!(settings.budget_enforcement, BudgetEnforcement::Preemptive);
        assert_eq!(settings.default_timeout_ms, Some(2000));
        assert_eq!(settings.default_bundle.k, 5);
        assert_eq!(settings.default_bundle.epsilon, Some(0.1));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: FileConfig = toml::from_str("[retry]\nmax_attempts = 1").unwrap();
        assert_eq!(config.retry.max_attempts, 1);
        // Defaults should apply
        assert_eq!(config.bundle, FileBundleConfig::default());
        assert!(config.orchestration.strict_conflict);
        assert!(config.events.tracing);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(FileConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            ("[retry]\nmax_attempts = 0", ConfigValidationError::ZeroAttempts),
            ("[retry]\nmultiplier = 0.5", ConfigValidationError::InvalidMultiplier(0.5)),
            (
                "[circuit_breaker]\nfailure_threshold = 0",
                ConfigValidationError::ZeroBreakerSetting("failure_threshold"),
            ),
            ("[idempotency]\ncapacity = 0", ConfigValidationError::ZeroCapacity),
            ("[bundle]\nk = 0", ConfigValidationError::ZeroReplicas),
            ("[bundle]\nepsilon = -0.1", ConfigValidationError::NegativeEpsilon(-0.1)),
        ];
        for (toml_str, expected) in cases {
            let config: FileConfig = toml::from_str(toml_str).unwrap();
            assert_eq!(config.validate(), Err(expected), "{}", toml_str);
        }
    }

    #[test]
    fn test_validate_unknown_pattern_category() {
        let config: FileConfig = toml::from_str("[retry.patterns]\nflaky = [\"oops\"]").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_validate_budget_enforcement() {
        let config: FileConfig =
            toml::from_str("[orchestration]\nbudget_enforcement = \"later\"").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidBudgetEnforcement(_))
        ));
    }
}
