//! Use cases
//!
//! - [`run_bundle`]: K-replica execution with early stop and aggregation
//! - [`orchestrate`]: the full run: planning, reliability, fallbacks

pub mod orchestrate;
pub mod run_bundle;
