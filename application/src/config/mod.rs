//! Application-level configuration.
//!
//! - [`OrchestratorSettings`]: conflict/budget strictness and bundle defaults
//! - [`ReliabilityConfig`](crate::reliability::ReliabilityConfig) lives with the
//!   reliability layer it configures

pub mod settings;

pub use settings::{BudgetEnforcement, OrchestratorSettings};
