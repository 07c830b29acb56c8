//! Port definitions (interfaces for external adapters)
//!
//! Ports define the contracts that tools and infrastructure adapters must
//! implement.

pub mod event_sink;
pub mod idempotency_store;
pub mod schema_validator;
pub mod tool;
