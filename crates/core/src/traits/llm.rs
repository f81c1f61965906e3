//! Provider capability traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::stream::ChunkStream;
use crate::types::{Message, TokenUsage, ToolDefinition};

/// Result of a provider call.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Text-generation capability.
///
/// Implementations must classify every failure into a
/// [`ProviderErrorKind`](crate::error::ProviderErrorKind); the runtime's retry
/// policy relies on nothing else.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, used in logs.
    fn name(&self) -> &str;

    /// Generate the next assistant message for a conversation.
    async fn generate(
        &self,
        conversation: &[Message],
        tools: &[ToolDefinition],
    ) -> ProviderResult<ProviderResponse>;

    /// Generate the next assistant message as a lazy chunk sequence.
    ///
    /// The default delivers the whole `generate` response as a single final
    /// chunk.
    async fn stream_generate(
        &self,
        conversation: &[Message],
        tools: &[ToolDefinition],
    ) -> ProviderResult<ChunkStream> {
        let response = self.generate(conversation, tools).await?;
        Ok(ChunkStream::from_response(response))
    }
}

/// Response from a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Assistant message, possibly requesting tool calls.
    pub message: Message,
    /// Token usage for the call.
    pub usage: TokenUsage,
    /// Finish reason reported by the provider.
    pub finish_reason: String,
}

impl ProviderResponse {
    /// Plain-text final answer.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(content),
            usage: TokenUsage::default(),
            finish_reason: "stop".to_string(),
        }
    }

    /// Response requesting tool calls.
    pub fn tool_calls(calls: Vec<crate::types::ToolCall>) -> Self {
        Self {
            message: Message::assistant_with_tools("", calls),
            usage: TokenUsage::default(),
            finish_reason: "tool_calls".to_string(),
        }
    }

    /// Attach usage.
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }
}
