//! Agent lifecycle hooks.
//!
//! Hooks observe and gate the think-act-observe loop without changing it:
//! - `on_start`: before the conversation is prepared
//! - `on_iteration`: at the start of every provider turn
//! - `before_generate`: before every provider call, retries included
//! - `after_generate`: after every successful provider call
//! - `on_tool_call` / `on_tool_result`: around every tool dispatch
//! - `on_error`: when the invocation ends `Failed`
//! - `on_end`: once, with the terminal state
//!
//! A hook error from a gating method fails the invocation, except
//! `on_tool_call`, whose error rejects just that call.

use std::sync::Arc;

use async_trait::async_trait;

use agentmesh_core::{
    traits::ProviderResponse,
    types::{AgentState, Message, ToolCall, ToolResult},
    Error, Result,
};

use crate::react::AgentRequest;

/// Pluggable observer of an agent invocation. Every method defaults to a no-op.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// Called before anything else. An error fails the run before the
    /// provider is consulted.
    async fn on_start(&self, _request: &AgentRequest) -> Result<()> {
        Ok(())
    }

    /// Called with the 1-based iteration number before the provider turn.
    async fn on_iteration(&self, _iteration: usize) -> Result<()> {
        Ok(())
    }

    async fn before_generate(&self, _conversation: &[Message]) -> Result<()> {
        Ok(())
    }

    async fn after_generate(&self, _response: &ProviderResponse) -> Result<()> {
        Ok(())
    }

    /// Called before a tool call is dispatched. An error skips the tool and
    /// feeds the rejection back to the model as a failed result.
    async fn on_tool_call(&self, _call: &ToolCall) -> Result<()> {
        Ok(())
    }

    async fn on_tool_result(&self, _call: &ToolCall, _result: &ToolResult) {}

    async fn on_error(&self, _error: &Error) {}

    async fn on_end(&self, _state: &AgentState) {}
}

/// Hooks invoked in registration order.
///
/// Gating methods stop at the first error; later hooks are not called.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn AgentHooks>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, hook: Arc<dyn AgentHooks>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl FromIterator<Arc<dyn AgentHooks>> for HookChain {
    fn from_iter<I: IntoIterator<Item = Arc<dyn AgentHooks>>>(iter: I) -> Self {
        Self {
            hooks: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AgentHooks for HookChain {
    async fn on_start(&self, request: &AgentRequest) -> Result<()> {
        for hook in &self.hooks {
            hook.on_start(request).await?;
        }
        Ok(())
    }

    async fn on_iteration(&self, iteration: usize) -> Result<()> {
        for hook in &self.hooks {
            hook.on_iteration(iteration).await?;
        }
        Ok(())
    }

    async fn before_generate(&self, conversation: &[Message]) -> Result<()> {
        for hook in &self.hooks {
            hook.before_generate(conversation).await?;
        }
        Ok(())
    }

    async fn after_generate(&self, response: &ProviderResponse) -> Result<()> {
        for hook in &self.hooks {
            hook.after_generate(response).await?;
        }
        Ok(())
    }

    async fn on_tool_call(&self, call: &ToolCall) -> Result<()> {
        for hook in &self.hooks {
            hook.on_tool_call(call).await?;
        }
        Ok(())
    }

    async fn on_tool_result(&self, call: &ToolCall, result: &ToolResult) {
        for hook in &self.hooks {
            hook.on_tool_result(call, result).await;
        }
    }

    async fn on_error(&self, error: &Error) {
        for hook in &self.hooks {
            hook.on_error(error).await;
        }
    }

    async fn on_end(&self, state: &AgentState) {
        for hook in &self.hooks {
            hook.on_end(state).await;
        }
    }
}
