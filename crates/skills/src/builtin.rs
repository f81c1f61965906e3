//! Built-in tools.

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use agentmesh_core::{error::ToolError, types::ToolOutput, Result};

/// JSON Schema for an argument type.
fn schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| json!({ "type": "object" }))
}

/// Deserialize tool arguments, reporting a tool failure on mismatch.
fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
    serde_json::from_value(args)
        .map_err(|e| ToolError::execution(tool, format!("invalid arguments: {}", e)).into())
}

// =============================================================================
// Echo Tool
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoArgs {
    /// The message to echo
    pub message: String,
}

/// Simple echo tool for testing.
pub struct EchoTool;

#[async_trait]
impl agentmesh_core::traits::Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the input message back"
    }

    fn parameters(&self) -> Value {
        schema::<EchoArgs>()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let args: EchoArgs = parse_args(self.name(), args)?;
        Ok(ToolOutput::text(format!("Echo: {}", args.message)))
    }
}

// =============================================================================
// Calculator Tool
// =============================================================================

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CalculatorArgs {
    /// The arithmetic operation to perform
    pub operation: Operation,
    /// First operand
    pub a: f64,
    /// Second operand
    pub b: f64,
}

/// Simple calculator tool.
pub struct CalculatorTool;

#[async_trait]
impl agentmesh_core::traits::Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Perform basic arithmetic operations"
    }

    fn parameters(&self) -> Value {
        schema::<CalculatorArgs>()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let CalculatorArgs { operation, a, b } = parse_args(self.name(), args)?;

        let result = match operation {
            Operation::Add => a + b,
            Operation::Subtract => a - b,
            Operation::Multiply => a * b,
            Operation::Divide => {
                if b == 0.0 {
                    return Ok(ToolOutput::error("Division by zero"));
                }
                a / b
            }
        };

        Ok(
            ToolOutput::text(format!("{} {} {} = {}", a, operation.as_str(), b, result))
                .with_data(json!({ "result": result })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_core::traits::Tool;
    use agentmesh_core::Error;

    #[tokio::test]
    async fn test_calculator() {
        let output = CalculatorTool
            .execute(json!({"operation": "multiply", "a": 6, "b": 7}))
            .await
            .unwrap();

        assert!(output.success);
        assert_eq!(output.data.unwrap()["result"], 42.0);
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_tool_errors() {
        let err = CalculatorTool
            .execute(json!({"operation": "modulo", "a": 1, "b": 2}))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Tool(ToolError::ExecutionFailed { .. })));
    }

    #[test]
    fn test_schema_lists_required_fields() {
        let params = EchoTool.parameters();
        assert_eq!(params["required"], json!(["message"]));
        assert!(params["properties"]["message"].is_object());
    }
}
