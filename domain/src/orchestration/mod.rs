//! Orchestration value objects: what a caller sends, what it gets back, and
//! the phases a run moves through.

pub mod output;
pub mod phase;
pub mod request;

pub use output::{
    BundleDigest, ErrorCode, OrchestrationOutput, OutputMetadata, RunStatus, ToolErrorReport,
};
pub use phase::{RunLifecycle, RunPhase};
pub use request::{OrchestrationConfig, OrchestrationRequest, validate_id};
