//! Configuration file loading for tool-orchestra
//!
//! This module handles file I/O and merging of configuration from multiple sources.
//! The priority order (highest to lowest):
//!
//! 1. `ORCHESTRA_` environment variables (`__` separates nested keys)
//! 2. `--config <path>` specified file
//! 3. Project root: `./orchestra.toml` or `./.orchestra.toml`
//! 4. Global config: `$XDG_CONFIG_HOME/tool-orchestra/config.toml`
//! 5. Default values

mod file_config;
mod loader;

pub use file_config::{
    ConfigValidationError, FileBundleConfig, FileCircuitBreakerConfig, FileConfig,
    FileEventsConfig, FileIdempotencyConfig, FileOrchestrationConfig, FilePlannerConfig,
    FileRetryConfig,
};
pub use loader::{ConfigLoader, ConfigSource, ENV_PREFIX};
