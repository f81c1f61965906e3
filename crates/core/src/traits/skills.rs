//! Tool traits.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, ToolError};
use crate::types::{ToolDefinition, ToolOutput};

/// Tool interface for atomic operations.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the unique name of the tool.
    fn name(&self) -> &str;

    /// Get the human-readable description.
    fn description(&self) -> &str;

    /// Get the JSON Schema for parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value) -> Result<ToolOutput>;

    /// Definition advertised to providers.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Dispatches tool calls by name.
///
/// Shared across concurrent agent invocations; implementations must be safe
/// for concurrent use and must not change after construction.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Definitions of every invocable tool.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Invoke a tool. Unknown names yield [`ToolError::NotFound`].
    async fn invoke(&self, name: &str, args: Value) -> std::result::Result<ToolOutput, ToolError>;
}
