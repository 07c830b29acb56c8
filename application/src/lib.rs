//! Application layer for tool-orchestra
//!
//! This crate contains the tool ports, the registry, the reliability runtime
//! and the orchestration use cases. It depends only on the domain layer.

pub mod config;
pub mod error;
pub mod ports;
pub mod registry;
pub mod reliability;
pub mod schemas;
pub mod use_cases;

// Re-export commonly used types
pub use config::{BudgetEnforcement, OrchestratorSettings};
pub use error::OrchestratorError;
pub use ports::{
    event_sink::{
        CollectingEventSink, CompositeEventSink, EventEmitter, EventSink, NoEventSink,
        RedactingEventSink, Redactor,
    },
    idempotency_store::IdempotencyStore,
    schema_validator::SchemaValidator,
    tool::{BundleTool, ReplicaContext, Tool, ToolResponse},
};
pub use registry::{RegistryError, ToolRegistry};
pub use reliability::{
    CircuitBreakerRegistry, InMemoryIdempotencyStore, ReliabilityConfig, ReliabilityManager,
    RetryManager, RetryOutcome,
};
pub use schemas::SchemaRegistry;
pub use use_cases::orchestrate::Orchestrator;
pub use use_cases::run_bundle::{BundleCall, BundleEngine};
