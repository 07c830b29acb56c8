//! Tool port
//!
//! Defines the interface the orchestrator consumes from the host application.
//! A tool is a named, versioned unit of work. Bundle-capable tools expose a
//! [`BundleTool`] through [`Tool::as_bundle`]; the bundle engine only runs
//! tools for which that capability check succeeds.

use super::event_sink::EventEmitter;
use async_trait::async_trait;
use orchestra_domain::{Budget, Generation, ToolError, ToolEstimates, ToolMetadata, Usage};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Result of a single (non-bundle) tool execution
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub content: Value,
    pub usage: Usage,
}

impl ToolResponse {
    pub fn new(content: Value) -> Self {
        Self {
            content,
            usage: Usage::default(),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// Per-replica context handed to [`BundleTool::generate`]
#[derive(Debug, Clone)]
pub struct ReplicaContext {
    /// Replica index, also the replicate id
    pub index: usize,
    pub seed: u64,
    /// Allotment for this replica, if any
    pub budget: Option<Budget>,
    /// Tool options from the request
    pub options: Value,
    /// Cancelled when the bundle is stopped, times out or is cancelled upstream
    pub cancel: CancellationToken,
}

/// Port for tools the orchestrator can run
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (registry key)
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str;

    /// Backend affinity used as the circuit breaker key
    fn provider(&self) -> Option<&str> {
        None
    }

    fn estimates(&self) -> ToolEstimates {
        ToolEstimates::default()
    }

    /// Bundle capability, if the tool has one
    fn as_bundle(&self) -> Option<&dyn BundleTool> {
        None
    }

    fn supports_bundle(&self) -> bool {
        self.as_bundle().is_some()
    }

    fn metadata(&self) -> ToolMetadata {
        let mut meta = ToolMetadata::new(self.name(), self.version(), self.description())
            .with_bundle_support(self.supports_bundle())
            .with_estimates(self.estimates());
        if let Some(provider) = self.provider() {
            meta = meta.with_provider(provider);
        }
        meta
    }

    /// Execute once.
    ///
    /// Bundle-only tools keep the default, which reports the call as
    /// unsupported; the orchestrator routes them through the bundle engine.
    async fn execute(
        &self,
        _request: &Value,
        _options: &Value,
        _events: &EventEmitter,
    ) -> Result<ToolResponse, ToolError> {
        Err(ToolError::unsupported(format!(
            "tool '{}' has no single-shot execution",
            self.name()
        )))
    }
}

/// Bundle capability: one generation per replica.
///
/// `generate` is the opaque backend boundary. It returns the raw output, the
/// resources it consumed and optionally the backend's own quality verdict.
#[async_trait]
pub trait BundleTool: Send + Sync {
    /// Model identifier recorded in the bundle meta
    fn model(&self) -> Option<&str> {
        None
    }

    async fn generate(&self, request: &Value, replica: &ReplicaContext)
    -> Result<Generation, ToolError>;
}
