//! Tool implementations shipped with tool-orchestra
//!
//! - `builtin`: backend-free demonstration tools (`echo`, `echo_bundle`)

pub mod builtin;

pub use builtin::{EchoBundleTool, EchoTool, builtin_tools, register_builtin_tools};
