//! Domain layer for tool-orchestra
//!
//! Pure types and pure functions. No I/O and no async runtime: everything
//! here can be unit tested with plain values.
//!
//! # Core Concepts
//!
//! ## Evidence Bundle
//!
//! A bundle tool runs K replicas of the same unit of work. The aggregator
//! reduces them into consensus fields, disagreements, a pairwise distance
//! matrix and a confidence score (see [`bundle`]).
//!
//! ## Reliability
//!
//! Errors are classified into categories with a retry verdict, retries follow
//! an exponential schedule with jitter, and a per-backend circuit breaker
//! fails fast while a dependency is unhealthy (see [`reliability`]).
//!
//! ## Planning
//!
//! Tool selection is rule data evaluated by one matcher; tools behind an open
//! circuit or over budget are skipped (see [`planning`]).

pub mod bundle;
pub mod core;
pub mod event;
pub mod idempotency;
pub mod orchestration;
pub mod planning;
pub mod reliability;
pub mod tool;

// Re-export commonly used types
pub use bundle::{
    BundleMeta, BundleOptions, BundleSummary, Disagreement, DistanceConfig, EvidenceBundle,
    Generation, OutputSchema, QualityFlag, Replicate, ReplicateQuality, StringDistance, summarize,
};
pub use core::{Budget, BudgetResource, BudgetViolation, ToolError, ToolErrorKind, Usage};
pub use event::{EventKind, OrchestrationEvent};
pub use idempotency::{IdempotencyCheck, IdempotencyRecord, payload_fingerprint};
pub use orchestration::{
    BundleDigest, ErrorCode, OrchestrationConfig, OrchestrationOutput, OrchestrationRequest,
    OutputMetadata, RunLifecycle, RunPhase, RunStatus, ToolErrorReport,
};
pub use planning::{
    PlanDecision, PlanRequest, PlanRule, Planner, RejectedCandidate, RejectionReason, RuleAction,
    RuleCondition,
};
pub use reliability::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Classification, ErrorCategory,
    ErrorClassifier, Rejection, RetryPolicy,
};
pub use tool::{ToolEstimates, ToolMetadata};
