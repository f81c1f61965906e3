use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;

// =============================================================================
// Conversation Types
// =============================================================================

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A single conversation entry. Immutable once appended to a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message.
    pub role: Role,

    /// Text content.
    pub content: String,

    /// Tool calls requested by an assistant message, in the order requested.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Correlation id of the call a tool message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Set on tool messages that carry a tool failure.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,

    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Assistant message requesting one or more tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// Tool message carrying a resolved tool call.
    pub fn tool(result: &ToolResult) -> Self {
        Self {
            tool_call_id: Some(result.call_id.clone()),
            is_error: result.is_error,
            ..Self::new(Role::Tool, result.content.clone())
        }
    }

    /// Whether this message asks for tool execution.
    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A tool invocation requested by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id linking the call to its result.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Argument payload.
    pub arguments: Value,
}

impl ToolCall {
    /// Create a tool call with a fresh correlation id.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }

    /// Override the correlation id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Resolution of a [`ToolCall`].
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Correlation id of the originating call.
    pub call_id: String,
    /// Tool name.
    pub tool: String,
    /// Output text, or the rendered failure.
    pub content: String,
    /// Whether the call failed.
    pub is_error: bool,
}

impl ToolResult {
    /// Build a result from an invocation outcome.
    pub fn from_outcome(call: &ToolCall, outcome: std::result::Result<String, ToolError>) -> Self {
        match outcome {
            Ok(content) => Self {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                content,
                is_error: false,
            },
            Err(err) => Self {
                call_id: call.id.clone(),
                tool: call.name.clone(),
                content: format!("Error: {}", err),
                is_error: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_message_carries_correlation() {
        let call = ToolCall::new("echo", serde_json::json!({"message": "hi"})).with_id("call-1");
        let result = ToolResult::from_outcome(&call, Err(ToolError::NotFound("echo".into())));
        let msg = Message::tool(&result);

        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-1"));
        assert!(msg.is_error);
        assert!(msg.content.contains("Tool not found"));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = Message::assistant("done");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("tool_calls").is_none());
    }
}
