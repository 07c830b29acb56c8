//! Output validation port

use serde_json::Value;

/// Validates replica output against a schema identified by URI.
///
/// An unknown URI is a validation failure, not a pass.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, schema_uri: &str, data: &Value) -> Result<(), Vec<String>>;
}
