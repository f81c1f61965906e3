//! Tool registry implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use agentmesh_core::{
    error::ToolError,
    traits::{Tool, ToolInvoker},
    types::{ToolDefinition, ToolOutput},
    Error, Result,
};

use crate::builtin::{CalculatorTool, EchoTool};

/// Explicit, caller-constructed tool registry.
///
/// Tools are added through [`ToolRegistryBuilder`]; once built the registry is
/// read-only and can be shared across concurrent agent invocations.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, used for stable definition listings.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// A registry holding the built-in tools.
    pub fn with_builtins() -> Self {
        let mut builder = Self::builder();
        builder.push(Arc::new(EchoTool));
        builder.push(Arc::new(CalculatorTool));
        builder.build()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}

#[async_trait]
impl ToolInvoker for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    async fn invoke(&self, name: &str, args: Value) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        tracing::debug!(tool = %name, "Executing tool");

        match tool.execute(args).await {
            Ok(output) if output.success => Ok(output),
            Ok(output) => Err(ToolError::execution(name, output.content)),
            Err(Error::Tool(err)) => Err(err),
            Err(err) => Err(ToolError::execution(name, err.to_string())),
        }
    }
}

/// Builder for [`ToolRegistry`].
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistryBuilder {
    /// Register a tool. Names must be unique.
    pub fn register(mut self, tool: Arc<dyn Tool>) -> Result<Self> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(Error::Internal(format!(
                "Tool '{}' is already registered",
                name
            )));
        }
        self.push(tool);
        Ok(self)
    }

    fn push(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        tracing::info!(tool = %name, "Registering tool");
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            tools: self.tools,
            order: self.order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_core::mocks::{FailingTool, RecordingTool};

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = ToolRegistry::builder()
            .register(Arc::new(EchoTool))
            .unwrap()
            .build();

        let tools = registry.definitions();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let result = ToolRegistry::builder()
            .register(Arc::new(EchoTool))
            .unwrap()
            .register(Arc::new(EchoTool));

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_invoke() {
        let registry = ToolRegistry::with_builtins();

        let result = registry
            .invoke("echo", serde_json::json!({"message": "Hello"}))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.content.contains("Hello"));
    }

    #[tokio::test]
    async fn test_invoke_not_found() {
        let registry = ToolRegistry::default();

        let result = registry.invoke("nonexistent", serde_json::json!({})).await;

        assert_eq!(result.unwrap_err(), ToolError::NotFound("nonexistent".into()));
    }

    #[tokio::test]
    async fn test_tool_failures_become_tool_errors() {
        let registry = ToolRegistry::builder()
            .register(Arc::new(FailingTool::new("flaky", "disk full")))
            .unwrap()
            .register(Arc::new(CalculatorTool))
            .unwrap()
            .build();

        let err = registry.invoke("flaky", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::execution("flaky", "disk full"));

        // Unsuccessful output is a failure too.
        let err = registry
            .invoke(
                "calculator",
                serde_json::json!({"operation": "divide", "a": 1, "b": 0}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_definitions_keep_registration_order() {
        let registry = ToolRegistry::builder()
            .register(Arc::new(RecordingTool::new("zeta", "last letter", "z")))
            .unwrap()
            .register(Arc::new(RecordingTool::new("alpha", "first letter", "a")))
            .unwrap()
            .build();

        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }
}
