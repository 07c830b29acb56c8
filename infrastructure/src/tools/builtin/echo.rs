//! Echo tools: return the request unchanged, once or per replica.

use async_trait::async_trait;
use orchestra_application::{BundleTool, EventEmitter, ReplicaContext, Tool, ToolResponse};
use orchestra_domain::{Generation, ToolError, Usage};
use serde_json::{Value, json};
use std::time::Duration;

/// Rough token count: a token per four bytes of JSON, at least one
fn estimate_tokens(value: &Value) -> u64 {
    let bytes = value.to_string().len() as u64;
    bytes.div_ceil(4).max(1)
}

fn delay_option(options: &Value) -> Option<Duration> {
    options
        .get("delay_ms")
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
}

/// Single-shot tool returning its request
#[derive(Debug, Default)]
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Returns the request payload unchanged"
    }

    async fn execute(
        &self,
        request: &Value,
        options: &Value,
        _events: &EventEmitter,
    ) -> Result<ToolResponse, ToolError> {
        if let Some(delay) = delay_option(options) {
            tokio::time::sleep(delay).await;
        }
        Ok(ToolResponse::new(request.clone()).with_usage(Usage::tokens(estimate_tokens(request))))
    }
}

/// Bundle tool whose replicas each return the request
#[derive(Debug, Default)]
pub struct EchoBundleTool;

#[async_trait]
impl Tool for EchoBundleTool {
    fn name(&self) -> &str {
        "echo_bundle"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Returns the request payload from every replica"
    }

    fn as_bundle(&self) -> Option<&dyn BundleTool> {
        Some(self)
    }
}

#[async_trait]
impl BundleTool for EchoBundleTool {
    fn model(&self) -> Option<&str> {
        Some("echo")
    }

    async fn generate(
        &self,
        request: &Value,
        replica: &ReplicaContext,
    ) -> Result<Generation, ToolError> {
        if let Some(delay) = delay_option(&replica.options) {
            tokio::select! {
                _ = replica.cancel.cancelled() => {
                    return Err(ToolError::cancelled(format!("echo_bundle replica {}", replica.index)));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let vary = replica
            .options
            .get("vary")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let data = match request {
            Value::Object(map) if vary => {
                let mut map = map.clone();
                map.insert("seed".to_string(), json!(replica.seed));
                Value::Object(map)
            }
            _ if vary => json!({"echo": request, "seed": replica.seed}),
            _ => request.clone(),
        };
        let usage = Usage::tokens(estimate_tokens(&data));
        Ok(Generation::new(data).with_usage(usage))
    }
}
