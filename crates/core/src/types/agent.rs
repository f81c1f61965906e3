use serde::{Deserialize, Serialize};

use super::message::Message;
use crate::error::{Error, Result};

// =============================================================================
// Agent State
// =============================================================================

/// Lifecycle status of one agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    /// Loop is consulting the provider.
    Running,
    /// Loop is dispatching tool calls.
    AwaitingTool,
    /// A final answer was produced.
    Succeeded,
    /// The provider failed, retries ran out, or the budget was exhausted.
    Failed,
    /// A policy limit ended the loop without an error (iteration bound,
    /// cancellation, deadline).
    Aborted,
}

impl AgentStatus {
    /// Whether the loop has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

/// Why an invocation ended `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    MaxIterations,
    Cancelled,
    DeadlineExceeded,
}

/// Token usage tracking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens used for prompts.
    pub prompt_tokens: u64,
    /// Tokens used for completions.
    pub completion_tokens: u64,
    /// Total tokens used.
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt: u64, completion: u64) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt.saturating_add(completion),
        }
    }

    /// Add usage to the tracker.
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// State of a single agent invocation.
///
/// Owned by exactly one runtime invocation. `iteration` and `retries` only
/// ever grow; the conversation only ever grows at the tail.
#[derive(Debug)]
pub struct AgentState {
    /// Agent identifier.
    pub agent_id: String,
    /// Memory session the conversation is persisted under.
    pub session_id: Option<String>,
    /// Ordered conversation.
    pub conversation: Vec<Message>,
    /// Provider turns taken so far.
    pub iteration: usize,
    /// Provider-call retries performed so far.
    pub retries: u32,
    /// Current status.
    pub status: AgentStatus,
    /// Final answer, set when `Succeeded`.
    pub output: Option<String>,
    /// Triggering error or diagnostic, set when `Failed` or `Aborted`.
    pub error: Option<Error>,
    /// Set when `Aborted`.
    pub abort_reason: Option<AbortReason>,
    /// Accumulated provider token usage.
    pub usage: TokenUsage,
}

impl AgentState {
    /// Fresh running state with an empty conversation.
    pub fn new(agent_id: impl Into<String>, session_id: Option<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id,
            conversation: Vec::new(),
            iteration: 0,
            retries: 0,
            status: AgentStatus::Running,
            output: None,
            error: None,
            abort_reason: None,
            usage: TokenUsage::default(),
        }
    }

    /// Mark the invocation succeeded with its final answer.
    pub fn succeed(&mut self, answer: impl Into<String>) {
        self.status = AgentStatus::Succeeded;
        self.output = Some(answer.into());
    }

    /// Mark the invocation failed.
    pub fn fail(&mut self, error: impl Into<Error>) {
        self.status = AgentStatus::Failed;
        self.error = Some(error.into());
    }

    /// Mark the invocation aborted by a policy limit.
    pub fn abort(&mut self, reason: AbortReason, diagnostic: impl Into<Error>) {
        self.status = AgentStatus::Aborted;
        self.abort_reason = Some(reason);
        self.error = Some(diagnostic.into());
    }

    /// Last message of the conversation.
    pub fn last_message(&self) -> Option<&Message> {
        self.conversation.last()
    }

    /// The final answer, or the error that ended the invocation.
    pub fn into_result(self) -> Result<String> {
        match (self.status, self.output, self.error) {
            (AgentStatus::Succeeded, Some(answer), _) => Ok(answer),
            (_, _, Some(err)) => Err(err),
            (status, _, _) => Err(Error::internal(format!(
                "agent ended in status {:?} without an answer",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;

    #[test]
    fn test_terminal_transitions() {
        let mut state = AgentState::new("agent", None);
        assert!(!state.status.is_terminal());

        state.abort(AbortReason::MaxIterations, AgentError::MaxIterationsExceeded(2));
        assert_eq!(state.status, AgentStatus::Aborted);
        assert_eq!(state.abort_reason, Some(AbortReason::MaxIterations));
        assert!(state.status.is_terminal());
        assert!(state.output.is_none());
    }

    #[test]
    fn test_usage_accumulates() {
        let mut usage = TokenUsage::default();
        usage.add(TokenUsage::new(10, 5));
        usage.add(TokenUsage::new(3, 2));
        assert_eq!(usage.total_tokens, 20);
        assert_eq!(usage.prompt_tokens, 13);
    }

    #[test]
    fn test_usage_saturates() {
        let mut usage = TokenUsage::new(u64::MAX - 1, 0);
        usage.add(TokenUsage::new(5, u64::MAX));
        assert_eq!(usage.prompt_tokens, u64::MAX);
        assert_eq!(usage.completion_tokens, u64::MAX);
        assert_eq!(usage.total_tokens, u64::MAX);
    }
}
