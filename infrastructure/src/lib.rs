//! Infrastructure layer for tool-orchestra
//!
//! This crate contains adapters that implement the ports defined
//! in the application layer, including configuration file loading.

pub mod config;
pub mod logging;
pub mod redaction;
pub mod schema_loader;
pub mod tools;

// Re-export commonly used types
pub use config::{ConfigLoader, ConfigSource, ConfigValidationError, FileConfig};
pub use logging::{JsonlEventSink, TracingEventSink};
pub use redaction::FieldRedactor;
pub use schema_loader::{SchemaLoadError, load_schemas};
pub use tools::{EchoBundleTool, EchoTool, builtin_tools, register_builtin_tools};
