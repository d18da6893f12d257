//! Tool declarations, the local tool registry, and the dispatcher that routes tool_calls
//! between local execution, the approval queue, and the transport edge (SPEC_FULL.md §4.4).

mod dispatcher;
pub mod implementations;
mod registry;

pub use dispatcher::{DispatchOutcome, FileRestriction, ToolDispatcher};
pub use registry::{Tool, ToolContext, ToolRegistry, ToolResult, ToolSpec};

use std::sync::Arc;

/// Registers the built-in local tool set (SPEC_FULL.md §4.4.1). IDE-remote tools are declared
/// by the transport edge layer, not here — the core never executes them.
pub async fn register_builtin_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(implementations::ReadFileTool)).await;
    registry.register(Arc::new(implementations::WriteFileTool)).await;
    registry.register(Arc::new(implementations::EditFileTool)).await;
    registry.register(Arc::new(implementations::BashTool)).await;
    registry.register(Arc::new(implementations::AskUserQuestionTool)).await;
}
