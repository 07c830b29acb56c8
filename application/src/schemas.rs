//! In-process schema registry
//!
//! Maps schema URIs to parsed [`OutputSchema`]s and serves as the default
//! [`SchemaValidator`] for the bundle engine.

use crate::ports::schema_validator::SchemaValidator;
use orchestra_domain::OutputSchema;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, OutputSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, uri: impl Into<String>, schema: OutputSchema) {
        let uri = uri.into();
        debug!(uri = %uri, "Registering output schema");
        self.schemas
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(uri, schema);
    }

    /// Parse and register a JSON schema document.
    pub fn register_json(&self, uri: impl Into<String>, doc: &Value) -> Result<(), String> {
        let schema = OutputSchema::from_json(doc)?;
        self.register(uri, schema);
        Ok(())
    }

    pub fn with_schema(self, uri: impl Into<String>, schema: OutputSchema) -> Self {
        self.register(uri, schema);
        self
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.schemas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(uri)
    }

    pub fn uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self
            .schemas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        uris.sort();
        uris
    }
}

impl SchemaValidator for SchemaRegistry {
    fn validate(&self, schema_uri: &str, data: &Value) -> Result<(), Vec<String>> {
        let schemas = self
            .schemas
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match schemas.get(schema_uri) {
            Some(schema) => schema.validate(data),
            None => Err(vec![format!("unknown schema: {}", schema_uri)]),
        }
    }
}
