//! Event output from TOML (`[events]` section)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw event configuration from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileEventsConfig {
    /// Append lifecycle events to this JSONL file
    pub jsonl_path: Option<PathBuf>,
    /// Mirror lifecycle events into the tracing log
    pub tracing: bool,
    /// Payload keys masked before events leave the process
    pub redact_fields: Vec<String>,
}

impl Default for FileEventsConfig {
    fn default() -> Self {
        Self {
            jsonl_path: None,
            tracing: true,
            redact_fields: ["api_key", "authorization", "password", "secret", "token"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
        }
    }
}
