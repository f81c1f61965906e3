//! Builder for AgentRuntime.

use std::sync::Arc;

use agentmesh_core::{
    traits::{MemoryStore, Provider, ToolInvoker},
    Error, Result,
};

use crate::executor::ToolExecutor;
use crate::hooks::{AgentHooks, HookChain};
use crate::react::{AgentConfig, AgentRuntime};
use crate::retry::RetryPolicy;

/// Builder for constructing an AgentRuntime.
pub struct AgentRuntimeBuilder {
    config: AgentConfig,
    provider: Option<Arc<dyn Provider>>,
    tools: Option<Arc<dyn ToolInvoker>>,
    memory: Option<Arc<dyn MemoryStore>>,
    hooks: HookChain,
}

impl AgentRuntimeBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: AgentConfig::default(),
            provider: None,
            tools: None,
            memory: None,
            hooks: HookChain::new(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the provider.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the tool invoker.
    pub fn with_tools(mut self, tools: Arc<dyn ToolInvoker>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Set the memory store used for session restore and persistence.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Add a lifecycle hook. Hooks run in the order they are added.
    pub fn with_hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    /// Build the AgentRuntime. A provider is required.
    pub fn build(self) -> Result<AgentRuntime> {
        let provider = self
            .provider
            .ok_or_else(|| Error::Config("agent runtime requires a provider".into()))?;

        Ok(AgentRuntime {
            config: self.config,
            provider,
            executor: ToolExecutor::new(self.tools),
            memory: self.memory,
            hooks: self.hooks,
        })
    }
}

impl Default for AgentRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmesh_core::mocks::ScriptedProvider;

    #[test]
    fn test_build_requires_provider() {
        let err = AgentRuntimeBuilder::new().build().err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_overrides_apply() {
        let runtime = AgentRuntimeBuilder::new()
            .with_provider(Arc::new(ScriptedProvider::answer("x")))
            .with_max_iterations(2)
            .with_retry_policy(RetryPolicy::default().with_max_retries(5))
            .build()
            .unwrap();

        assert_eq!(runtime.config().max_iterations, 2);
        assert_eq!(runtime.config().retry.max_retries, 5);
    }
}
