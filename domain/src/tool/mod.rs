//! Tool domain module
//!
//! Describes tools as catalog data. The executable side of a tool (the async
//! `Tool` trait and its bundle capability) is a port in the application layer;
//! this module only holds what the planner and the registry need to reason
//! about tools without running them.
//!
//! ```text
//! ┌──────────────┐   breaker_key()   ┌──────────────────┐
//! │ ToolMetadata │ ────────────────▶ │ circuit breaker  │
//! │ name/version │                   │ (per provider)   │
//! │ provider     │   estimates       ┌──────────────────┐
//! │ bundle flag  │ ────────────────▶ │ planner budget   │
//! └──────────────┘                   │ filter           │
//!                                    └──────────────────┘
//! ```

pub mod metadata;

pub use metadata::{ToolEstimates, ToolMetadata};
