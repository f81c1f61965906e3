//! Tool executor for the agent runtime.
//!
//! Resolves provider-requested tool calls through the tool invoker and turns
//! every outcome, including failures, into a [`ToolResult`].

use std::sync::Arc;

use agentmesh_core::{
    error::ToolError,
    traits::ToolInvoker,
    types::{ToolCall, ToolDefinition, ToolResult},
};

/// Tool executor that wraps invoker access.
#[derive(Clone, Default)]
pub struct ToolExecutor {
    tools: Option<Arc<dyn ToolInvoker>>,
}

impl ToolExecutor {
    /// Create a new tool executor.
    pub fn new(tools: Option<Arc<dyn ToolInvoker>>) -> Self {
        Self { tools }
    }

    /// Definitions advertised to the provider.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .as_ref()
            .map(|tools| tools.definitions())
            .unwrap_or_default()
    }

    /// Execute one tool call. Never fails; failures are carried in the result.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        tracing::info!(tool = %call.name, call_id = %call.id, "Executing tool call");

        let outcome = match &self.tools {
            Some(tools) => tools
                .invoke(&call.name, call.arguments.clone())
                .await
                .map(|output| output.content),
            None => Err(ToolError::NotFound(call.name.clone())),
        };

        if let Err(e) = &outcome {
            tracing::debug!(tool = %call.name, error = %e, "Tool call failed");
        }

        ToolResult::from_outcome(call, outcome)
    }
}
