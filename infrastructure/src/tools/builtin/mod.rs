//! Built-in tools
//!
//! Both tools read two optional tool options:
//!
//! | Option | Effect |
//! |--------|--------|
//! | `delay_ms` | sleep before answering |
//! | `vary` | (`echo_bundle`) include the replica seed so replicas disagree |

mod echo;

pub use echo::{EchoBundleTool, EchoTool};

use orchestra_application::{RegistryError, Tool, ToolRegistry};
use std::sync::Arc;

pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(EchoTool), Arc::new(EchoBundleTool)]
}

/// Register every built-in tool.
pub fn register_builtin_tools(registry: &ToolRegistry) -> Result<(), RegistryError> {
    for tool in builtin_tools() {
        registry.register(tool)?;
    }
    Ok(())
}
